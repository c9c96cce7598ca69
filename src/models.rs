use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

// ---------------------------------------------------------------- catalog

/// Fixed set of listing categories. Anything else is rejected at the JSON
/// boundary and by the `categoria` CHECK constraint in Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Categoria {
    Supercar,
    Hypercar,
    LuxurySedan,
    LuxurySuv,
    Convertible,
    CoupeGranTurismo,
    DeportivoClasico,
}

impl Categoria {
    pub const ALL: [Categoria; 7] = [
        Categoria::Supercar,
        Categoria::Hypercar,
        Categoria::LuxurySedan,
        Categoria::LuxurySuv,
        Categoria::Convertible,
        Categoria::CoupeGranTurismo,
        Categoria::DeportivoClasico,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Categoria::Supercar => "supercar",
            Categoria::Hypercar => "hypercar",
            Categoria::LuxurySedan => "luxury-sedan",
            Categoria::LuxurySuv => "luxury-suv",
            Categoria::Convertible => "convertible",
            Categoria::CoupeGranTurismo => "coupe-gran-turismo",
            Categoria::DeportivoClasico => "deportivo-clasico",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Categoria::Supercar => "Supercar",
            Categoria::Hypercar => "Hypercar",
            Categoria::LuxurySedan => "Sedán de Lujo",
            Categoria::LuxurySuv => "SUV de Lujo",
            Categoria::Convertible => "Convertible",
            Categoria::CoupeGranTurismo => "Coupé Gran Turismo",
            Categoria::DeportivoClasico => "Deportivo Clásico",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Categoria::Supercar => "red",
            Categoria::Hypercar => "purple",
            Categoria::LuxurySedan => "blue",
            Categoria::LuxurySuv => "green",
            Categoria::Convertible => "yellow",
            Categoria::CoupeGranTurismo => "orange",
            Categoria::DeportivoClasico => "indigo",
        }
    }
}

impl fmt::Display for Categoria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Categoria {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Categoria::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("categoría desconocida: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoriaInfo {
    pub value: Categoria,
    pub label: String,
    pub color: String,
}

impl From<Categoria> for CategoriaInfo {
    fn from(c: Categoria) -> Self {
        Self { value: c, label: c.label().into(), color: c.color().into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Auto {
    pub id: Id,
    pub marca: String,
    pub modelo: String,
    #[serde(rename = "año")]
    pub anio: Option<i32>,
    pub precio: Option<f64>,
    pub descripcion: Option<String>,
    pub potencia: Option<String>,
    pub caballos_fuerza: Option<i32>,
    pub cilindrada: Option<String>,
    pub tamano_motor: Option<String>,
    pub tipo_combustible: Option<String>,
    pub transmision: Option<String>,
    pub traccion: Option<String>,
    pub largo: Option<String>,
    pub ancho: Option<String>,
    pub alto: Option<String>,
    pub peso: Option<String>,
    pub imagenes: Vec<String>,
    pub videos: Vec<String>,
    pub categoria: Categoria,
}

/// Create / replace payload. `PUT /api/autos/{id}` reuses it so a replace
/// goes through the same validation as a create.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewAuto {
    #[serde(default)]
    pub marca: String,
    #[serde(default)]
    pub modelo: String,
    #[serde(rename = "año", default)]
    pub anio: Option<i32>,
    #[serde(default)]
    pub precio: Option<f64>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub potencia: Option<String>,
    #[serde(default)]
    pub caballos_fuerza: Option<i32>,
    #[serde(default)]
    pub cilindrada: Option<String>,
    #[serde(default)]
    pub tamano_motor: Option<String>,
    #[serde(default)]
    pub tipo_combustible: Option<String>,
    #[serde(default)]
    pub transmision: Option<String>,
    #[serde(default)]
    pub traccion: Option<String>,
    #[serde(default)]
    pub largo: Option<String>,
    #[serde(default)]
    pub ancho: Option<String>,
    #[serde(default)]
    pub alto: Option<String>,
    #[serde(default)]
    pub peso: Option<String>,
    #[serde(default)]
    pub imagenes: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    pub categoria: Categoria,
}

impl NewAuto {
    pub fn validate(&self) -> Result<(), String> {
        if self.marca.trim().is_empty() {
            return Err("marca es requerida".into());
        }
        if self.modelo.trim().is_empty() {
            return Err("modelo es requerido".into());
        }
        validate_auto_numbers(self.anio, self.precio, self.caballos_fuerza)
    }

    pub fn into_auto(self, id: Id) -> Auto {
        Auto {
            id,
            marca: self.marca,
            modelo: self.modelo,
            anio: self.anio,
            precio: self.precio,
            descripcion: self.descripcion,
            potencia: self.potencia,
            caballos_fuerza: self.caballos_fuerza,
            cilindrada: self.cilindrada,
            tamano_motor: self.tamano_motor,
            tipo_combustible: self.tipo_combustible,
            transmision: self.transmision,
            traccion: self.traccion,
            largo: self.largo,
            ancho: self.ancho,
            alto: self.alto,
            peso: self.peso,
            imagenes: self.imagenes,
            videos: self.videos,
            categoria: self.categoria,
        }
    }
}

/// Partial update: only the fields present in the body are overwritten.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAuto {
    pub marca: Option<String>,
    pub modelo: Option<String>,
    #[serde(rename = "año")]
    pub anio: Option<i32>,
    pub precio: Option<f64>,
    pub descripcion: Option<String>,
    pub potencia: Option<String>,
    pub caballos_fuerza: Option<i32>,
    pub cilindrada: Option<String>,
    pub tamano_motor: Option<String>,
    pub tipo_combustible: Option<String>,
    pub transmision: Option<String>,
    pub traccion: Option<String>,
    pub largo: Option<String>,
    pub ancho: Option<String>,
    pub alto: Option<String>,
    pub peso: Option<String>,
    pub imagenes: Option<Vec<String>>,
    pub videos: Option<Vec<String>>,
    pub categoria: Option<Categoria>,
}

impl UpdateAuto {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.marca, Some(m) if m.trim().is_empty()) {
            return Err("marca no puede estar vacía".into());
        }
        if matches!(&self.modelo, Some(m) if m.trim().is_empty()) {
            return Err("modelo no puede estar vacío".into());
        }
        validate_auto_numbers(self.anio, self.precio, self.caballos_fuerza)
    }

    pub fn apply(self, auto: &mut Auto) {
        if let Some(v) = self.marca { auto.marca = v; }
        if let Some(v) = self.modelo { auto.modelo = v; }
        if let Some(v) = self.anio { auto.anio = Some(v); }
        if let Some(v) = self.precio { auto.precio = Some(v); }
        if let Some(v) = self.descripcion { auto.descripcion = Some(v); }
        if let Some(v) = self.potencia { auto.potencia = Some(v); }
        if let Some(v) = self.caballos_fuerza { auto.caballos_fuerza = Some(v); }
        if let Some(v) = self.cilindrada { auto.cilindrada = Some(v); }
        if let Some(v) = self.tamano_motor { auto.tamano_motor = Some(v); }
        if let Some(v) = self.tipo_combustible { auto.tipo_combustible = Some(v); }
        if let Some(v) = self.transmision { auto.transmision = Some(v); }
        if let Some(v) = self.traccion { auto.traccion = Some(v); }
        if let Some(v) = self.largo { auto.largo = Some(v); }
        if let Some(v) = self.ancho { auto.ancho = Some(v); }
        if let Some(v) = self.alto { auto.alto = Some(v); }
        if let Some(v) = self.peso { auto.peso = Some(v); }
        if let Some(v) = self.imagenes { auto.imagenes = v; }
        if let Some(v) = self.videos { auto.videos = v; }
        if let Some(v) = self.categoria { auto.categoria = v; }
    }
}

fn validate_auto_numbers(anio: Option<i32>, precio: Option<f64>, hp: Option<i32>) -> Result<(), String> {
    if let Some(a) = anio {
        if !(1885..=2100).contains(&a) {
            return Err(format!("año fuera de rango: {a}"));
        }
    }
    if let Some(p) = precio {
        if !p.is_finite() || p < 0.0 {
            return Err("precio debe ser un número no negativo".into());
        }
    }
    if matches!(hp, Some(h) if h < 0) {
        return Err("caballosFuerza no puede ser negativo".into());
    }
    Ok(())
}

// ---------------------------------------------------------------- accounts

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Usuario {
    pub id: Id,
    pub email: String,
    pub nombre: String,
    #[schema(value_type = String, example = "user")]
    pub rol: Role,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    pub imagen: Option<String>, // image-store key
    pub creado_en: DateTime<Utc>,
}

/// Account plus its argon2 hash. Only the identity store and the login
/// handler see this; responses always carry the bare `Usuario`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsuarioConCredencial {
    pub usuario: Usuario,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "name")]
    pub nombre: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.email.trim().is_empty() || self.password.is_empty() || self.nombre.trim().is_empty() {
            return Err("Faltan campos requeridos".into());
        }
        if !self.email.contains('@') {
            return Err("email inválido".into());
        }
        if self.password.chars().count() < 8 {
            return Err("la contraseña debe tener al menos 8 caracteres".into());
        }
        Ok(())
    }
}

/// What the repository needs to create an account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUsuario {
    pub email: String,
    pub nombre: String,
    pub rol: Role,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub message: String,
    pub id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub id: Id,
    pub email: String,
    pub nombre: String,
    /// Same value as `nombre`; older clients read this key.
    pub name: String,
    #[schema(value_type = String)]
    pub rol: Role,
    pub token: String,
}

impl LoginResponse {
    pub fn new(u: Usuario, token: String) -> Self {
        Self { id: u.id, email: u.email, name: u.nombre.clone(), nombre: u.nombre, rol: u.rol, token }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUsuario {
    #[serde(alias = "name")]
    pub nombre: Option<String>,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
}

impl UpdateUsuario {
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.nombre, Some(n) if n.trim().is_empty()) {
            return Err("nombre no puede estar vacío".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------- comments

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comentario {
    pub id: Id,
    pub auto_id: Id,
    pub usuario_id: Option<Id>,
    pub nombre_anonimo: Option<String>,
    pub contenido: String,
    pub calificacion: Option<i16>,
    pub parent_id: Option<Id>,
    /// Ids of direct replies, derived from their `parentId`.
    pub respuestas: Vec<Id>,
    pub fecha: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewComentario {
    pub auto_id: Id,
    #[serde(default)]
    pub usuario_id: Option<Id>,
    #[serde(default)]
    pub nombre_anonimo: Option<String>,
    #[serde(default)]
    pub contenido: String,
    #[serde(default)]
    pub calificacion: Option<i16>,
    #[serde(default)]
    pub parent_id: Option<Id>,
}

impl NewComentario {
    pub fn validate(&self) -> Result<(), String> {
        if self.contenido.trim().is_empty() {
            return Err("contenido es requerido".into());
        }
        let anonimo = self.nombre_anonimo.as_deref().map(str::trim).unwrap_or("");
        if self.usuario_id.is_none() && anonimo.is_empty() {
            return Err("se requiere usuarioId o nombreAnonimo".into());
        }
        validate_calificacion(self.calificacion)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateComentario {
    #[serde(default)]
    pub contenido: String,
    #[serde(default)]
    pub calificacion: Option<i16>,
}

impl UpdateComentario {
    pub fn validate(&self) -> Result<(), String> {
        if self.contenido.trim().is_empty() {
            return Err("contenido es requerido".into());
        }
        validate_calificacion(self.calificacion)
    }
}

fn validate_calificacion(c: Option<i16>) -> Result<(), String> {
    match c {
        Some(v) if !(1..=5).contains(&v) => Err(format!("calificacion debe estar entre 1 y 5, no {v}")),
        _ => Ok(()),
    }
}

/// A comment as shown on a listing page: author resolved, replies expanded
/// one level. Replies carry an empty `respuestas`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComentarioVista {
    pub id: Id,
    pub auto_id: Id,
    pub usuario_id: Option<Id>,
    pub autor: String,
    pub contenido: String,
    pub calificacion: Option<i16>,
    pub parent_id: Option<Id>,
    pub fecha: DateTime<Utc>,
    pub respuestas: Vec<ComentarioVista>,
}

// ---------------------------------------------------------------- appointments

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Cita {
    pub id: Id,
    pub auto_id: Id,
    pub usuario_id: Id,
    pub fecha: NaiveDate,
    pub hora: String,
    pub servicio: String,
    pub nombre: String,
    pub email: String,
    pub telefono: String,
    pub direccion: Option<String>,
    pub notas: Option<String>,
    pub creada_en: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewCita {
    pub auto_id: Id,
    pub usuario_id: Id,
    pub fecha: NaiveDate,
    #[serde(default)]
    pub hora: String,
    #[serde(default)]
    pub servicio: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub telefono: String,
    #[serde(default)]
    pub direccion: Option<String>,
    #[serde(default)]
    pub notas: Option<String>,
}

impl NewCita {
    pub fn validate(&self) -> Result<(), String> {
        for (campo, valor) in [
            ("hora", &self.hora),
            ("servicio", &self.servicio),
            ("nombre", &self.nombre),
            ("email", &self.email),
            ("telefono", &self.telefono),
        ] {
            if valor.trim().is_empty() {
                return Err(format!("{campo} es requerido"));
            }
        }
        if chrono::NaiveTime::parse_from_str(self.hora.trim(), "%H:%M").is_err() {
            return Err(format!("hora inválida: {}", self.hora));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct CitaFiltro {
    pub usuario_id: Option<Id>,
    pub auto_id: Option<Id>,
}

// ---------------------------------------------------------------- sales

pub const ESTADO_PAGADA: &str = "pagada";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Venta {
    pub id: Id,
    pub auto_id: Id,
    pub usuario_id: Option<Id>,
    pub monto: f64,
    pub moneda: String,
    pub estado: String,
    pub session_id: String,
    pub fecha: DateTime<Utc>,
}

/// Built only from processor-confirmed checkout data.
#[derive(Debug, Clone)]
pub struct NewVenta {
    pub auto_id: Id,
    pub usuario_id: Option<Id>,
    pub monto: f64,
    pub moneda: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct VentaFiltro {
    pub usuario_id: Option<Id>,
}
