use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::*;
use crate::auth::Role;

#[derive(Clone)]
pub struct PgRepo { pool: PgPool }

impl PgRepo {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn map_err(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => RepoError::Conflict,
            Some("23514") | Some("23503") => RepoError::Invalid(db.message().to_string()),
            _ => RepoError::Internal(e.to_string()),
        },
        _ => RepoError::Internal(e.to_string()),
    }
}

// ---------------------------------------------------------------- rows

const AUTO_COLUMNS: &str = "id, marca, modelo, anio, precio, descripcion, potencia, caballos_fuerza, \
    cilindrada, tamano_motor, tipo_combustible, transmision, traccion, largo, ancho, alto, peso, \
    imagenes, videos, categoria";

#[derive(sqlx::FromRow)]
struct AutoRow {
    id: Id,
    marca: String,
    modelo: String,
    anio: Option<i32>,
    precio: Option<f64>,
    descripcion: Option<String>,
    potencia: Option<String>,
    caballos_fuerza: Option<i32>,
    cilindrada: Option<String>,
    tamano_motor: Option<String>,
    tipo_combustible: Option<String>,
    transmision: Option<String>,
    traccion: Option<String>,
    largo: Option<String>,
    ancho: Option<String>,
    alto: Option<String>,
    peso: Option<String>,
    imagenes: Vec<String>,
    videos: Vec<String>,
    categoria: String,
}

impl TryFrom<AutoRow> for Auto {
    type Error = RepoError;

    fn try_from(r: AutoRow) -> Result<Self, Self::Error> {
        Ok(Auto {
            id: r.id,
            marca: r.marca,
            modelo: r.modelo,
            anio: r.anio,
            precio: r.precio,
            descripcion: r.descripcion,
            potencia: r.potencia,
            caballos_fuerza: r.caballos_fuerza,
            cilindrada: r.cilindrada,
            tamano_motor: r.tamano_motor,
            tipo_combustible: r.tipo_combustible,
            transmision: r.transmision,
            traccion: r.traccion,
            largo: r.largo,
            ancho: r.ancho,
            alto: r.alto,
            peso: r.peso,
            imagenes: r.imagenes,
            videos: r.videos,
            categoria: r.categoria.parse().map_err(RepoError::Internal)?,
        })
    }
}

const USUARIO_COLUMNS: &str = "id, email, nombre, rol, telefono, direccion, imagen, creado_en, password_hash";

#[derive(sqlx::FromRow)]
struct UsuarioRow {
    id: Id,
    email: String,
    nombre: String,
    rol: String,
    telefono: Option<String>,
    direccion: Option<String>,
    imagen: Option<String>,
    creado_en: DateTime<Utc>,
    password_hash: String,
}

impl TryFrom<UsuarioRow> for UsuarioConCredencial {
    type Error = RepoError;

    fn try_from(r: UsuarioRow) -> Result<Self, Self::Error> {
        Ok(UsuarioConCredencial {
            usuario: Usuario {
                id: r.id,
                email: r.email,
                nombre: r.nombre,
                rol: r.rol.parse::<Role>().map_err(RepoError::Internal)?,
                telefono: r.telefono,
                direccion: r.direccion,
                imagen: r.imagen,
                creado_en: r.creado_en,
            },
            password_hash: r.password_hash,
        })
    }
}

fn to_usuario(r: UsuarioRow) -> RepoResult<Usuario> {
    UsuarioConCredencial::try_from(r).map(|u| u.usuario)
}

const COMENTARIO_SELECT: &str = "SELECT c.id, c.auto_id, c.usuario_id, c.nombre_anonimo, c.contenido, \
    c.calificacion, c.parent_id, c.fecha, \
    ARRAY(SELECT r.id FROM comentarios r WHERE r.parent_id = c.id ORDER BY r.id) AS respuestas \
    FROM comentarios c";

const CITA_COLUMNS: &str = "id, auto_id, usuario_id, fecha, hora, servicio, nombre, email, telefono, direccion, notas, creada_en";

const VENTA_COLUMNS: &str = "id, auto_id, usuario_id, monto, moneda, estado, session_id, fecha";

// ---------------------------------------------------------------- catalog

impl PgRepo {
    async fn write_auto(&self, tx: &mut Transaction<'_, Postgres>, id: Id, a: &NewAuto) -> RepoResult<Auto> {
        let sql = format!(
            "UPDATE autos SET marca=$2, modelo=$3, anio=$4, precio=$5, descripcion=$6, potencia=$7, \
             caballos_fuerza=$8, cilindrada=$9, tamano_motor=$10, tipo_combustible=$11, transmision=$12, \
             traccion=$13, largo=$14, ancho=$15, alto=$16, peso=$17, imagenes=$18, videos=$19, categoria=$20 \
             WHERE id=$1 RETURNING {AUTO_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AutoRow>(&sql)
            .bind(id)
            .bind(&a.marca)
            .bind(&a.modelo)
            .bind(a.anio)
            .bind(a.precio)
            .bind(&a.descripcion)
            .bind(&a.potencia)
            .bind(a.caballos_fuerza)
            .bind(&a.cilindrada)
            .bind(&a.tamano_motor)
            .bind(&a.tipo_combustible)
            .bind(&a.transmision)
            .bind(&a.traccion)
            .bind(&a.largo)
            .bind(&a.ancho)
            .bind(&a.alto)
            .bind(&a.peso)
            .bind(&a.imagenes)
            .bind(&a.videos)
            .bind(a.categoria.as_str())
            .fetch_one(&mut **tx)
            .await
            .map_err(map_err)?;
        row.try_into()
    }
}

fn auto_to_new(a: Auto) -> NewAuto {
    NewAuto {
        marca: a.marca,
        modelo: a.modelo,
        anio: a.anio,
        precio: a.precio,
        descripcion: a.descripcion,
        potencia: a.potencia,
        caballos_fuerza: a.caballos_fuerza,
        cilindrada: a.cilindrada,
        tamano_motor: a.tamano_motor,
        tipo_combustible: a.tipo_combustible,
        transmision: a.transmision,
        traccion: a.traccion,
        largo: a.largo,
        ancho: a.ancho,
        alto: a.alto,
        peso: a.peso,
        imagenes: a.imagenes,
        videos: a.videos,
        categoria: a.categoria,
    }
}

#[async_trait]
impl AutoRepo for PgRepo {
    async fn list_autos(&self) -> RepoResult<Vec<Auto>> {
        let rows = sqlx::query_as::<_, AutoRow>(&format!("SELECT {AUTO_COLUMNS} FROM autos ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(Auto::try_from).collect()
    }

    async fn get_auto(&self, id: Id) -> RepoResult<Auto> {
        sqlx::query_as::<_, AutoRow>(&format!("SELECT {AUTO_COLUMNS} FROM autos WHERE id=$1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?
            .try_into()
    }

    async fn create_auto(&self, new: NewAuto) -> RepoResult<Auto> {
        // Insert a bare row, then fill every column through the shared writer.
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let (id,): (Id,) = sqlx::query_as("INSERT INTO autos (marca, modelo, categoria) VALUES ($1,$2,$3) RETURNING id")
            .bind(&new.marca)
            .bind(&new.modelo)
            .bind(new.categoria.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?;
        let auto = self.write_auto(&mut tx, id, &new).await?;
        tx.commit().await.map_err(map_err)?;
        Ok(auto)
    }

    async fn replace_auto(&self, id: Id, new: NewAuto) -> RepoResult<Auto> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let auto = self.write_auto(&mut tx, id, &new).await?;
        tx.commit().await.map_err(map_err)?;
        Ok(auto)
    }

    async fn update_auto(&self, id: Id, upd: UpdateAuto) -> RepoResult<Auto> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let mut current: Auto = sqlx::query_as::<_, AutoRow>(&format!("SELECT {AUTO_COLUMNS} FROM autos WHERE id=$1 FOR UPDATE"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_err)?
            .try_into()?;
        upd.apply(&mut current);
        let auto = self.write_auto(&mut tx, id, &auto_to_new(current)).await?;
        tx.commit().await.map_err(map_err)?;
        Ok(auto)
    }

    async fn delete_auto(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM autos WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------- accounts

#[async_trait]
impl UsuarioRepo for PgRepo {
    async fn create_usuario(&self, new: NewUsuario) -> RepoResult<Usuario> {
        let row = sqlx::query_as::<_, UsuarioRow>(&format!(
            "INSERT INTO usuarios (email, nombre, rol, password_hash) VALUES ($1,$2,$3,$4) RETURNING {USUARIO_COLUMNS}"
        ))
        .bind(normalize_email(&new.email))
        .bind(&new.nombre)
        .bind(new.rol.as_str())
        .bind(&new.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        to_usuario(row)
    }

    async fn find_credentials(&self, email: &str) -> RepoResult<UsuarioConCredencial> {
        sqlx::query_as::<_, UsuarioRow>(&format!("SELECT {USUARIO_COLUMNS} FROM usuarios WHERE email=$1"))
            .bind(normalize_email(email))
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?
            .try_into()
    }

    async fn get_usuario(&self, id: Id) -> RepoResult<Usuario> {
        let row = sqlx::query_as::<_, UsuarioRow>(&format!("SELECT {USUARIO_COLUMNS} FROM usuarios WHERE id=$1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        to_usuario(row)
    }

    async fn list_usuarios(&self) -> RepoResult<Vec<Usuario>> {
        let rows = sqlx::query_as::<_, UsuarioRow>(&format!("SELECT {USUARIO_COLUMNS} FROM usuarios ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(to_usuario).collect()
    }

    async fn usuarios_by_ids(&self, ids: &[Id]) -> RepoResult<Vec<Usuario>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, UsuarioRow>(&format!("SELECT {USUARIO_COLUMNS} FROM usuarios WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.into_iter().map(to_usuario).collect()
    }

    async fn update_perfil(&self, id: Id, upd: UpdateUsuario, imagen: Option<String>) -> RepoResult<Usuario> {
        let row = sqlx::query_as::<_, UsuarioRow>(&format!(
            "UPDATE usuarios SET nombre = COALESCE($2, nombre), telefono = COALESCE($3, telefono), \
             direccion = COALESCE($4, direccion), imagen = COALESCE($5, imagen) \
             WHERE id=$1 RETURNING {USUARIO_COLUMNS}"
        ))
        .bind(id)
        .bind(upd.nombre)
        .bind(upd.telefono)
        .bind(upd.direccion)
        .bind(imagen)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        to_usuario(row)
    }

    async fn clear_imagen(&self, id: Id) -> RepoResult<Usuario> {
        let row = sqlx::query_as::<_, UsuarioRow>(&format!(
            "UPDATE usuarios SET imagen = NULL WHERE id=$1 RETURNING {USUARIO_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        to_usuario(row)
    }

    async fn delete_usuario(&self, id: Id) -> RepoResult<Usuario> {
        let row = sqlx::query_as::<_, UsuarioRow>(&format!("DELETE FROM usuarios WHERE id=$1 RETURNING {USUARIO_COLUMNS}"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        to_usuario(row)
    }
}

// ---------------------------------------------------------------- comments

#[async_trait]
impl ComentarioRepo for PgRepo {
    async fn list_comentarios(&self, auto_id: Id) -> RepoResult<Vec<Comentario>> {
        sqlx::query_as::<_, Comentario>(&format!("{COMENTARIO_SELECT} WHERE c.auto_id=$1 ORDER BY c.id"))
            .bind(auto_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn get_comentario(&self, id: Id) -> RepoResult<Comentario> {
        sqlx::query_as::<_, Comentario>(&format!("{COMENTARIO_SELECT} WHERE c.id=$1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn create_comentario(&self, new: NewComentario) -> RepoResult<Comentario> {
        // Single statement: the parent check and the insert cannot be split by a crash.
        let inserted: Option<(Id,)> = sqlx::query_as(
            "INSERT INTO comentarios (auto_id, usuario_id, nombre_anonimo, contenido, calificacion, parent_id) \
             SELECT $1::BIGINT, $2::BIGINT, $3::TEXT, $4::TEXT, $5::SMALLINT, $6::BIGINT \
             WHERE $6::BIGINT IS NULL \
                OR EXISTS (SELECT 1 FROM comentarios p WHERE p.id = $6::BIGINT AND p.auto_id = $1::BIGINT) \
             RETURNING id",
        )
        .bind(new.auto_id)
        .bind(new.usuario_id)
        .bind(&new.nombre_anonimo)
        .bind(&new.contenido)
        .bind(new.calificacion)
        .bind(new.parent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        let Some((id,)) = inserted else {
            return Err(RepoError::Invalid("parentId no existe en este auto".into()));
        };
        self.get_comentario(id).await
    }

    async fn update_comentario(&self, id: Id, upd: UpdateComentario) -> RepoResult<Comentario> {
        let res = sqlx::query("UPDATE comentarios SET contenido=$2, calificacion=$3 WHERE id=$1")
            .bind(id)
            .bind(&upd.contenido)
            .bind(upd.calificacion)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        self.get_comentario(id).await
    }
}

// ---------------------------------------------------------------- appointments / sales

#[async_trait]
impl CitaRepo for PgRepo {
    async fn create_cita(&self, new: NewCita) -> RepoResult<Cita> {
        sqlx::query_as::<_, Cita>(&format!(
            "INSERT INTO citas (auto_id, usuario_id, fecha, hora, servicio, nombre, email, telefono, direccion, notas) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) RETURNING {CITA_COLUMNS}"
        ))
        .bind(new.auto_id)
        .bind(new.usuario_id)
        .bind(new.fecha)
        .bind(&new.hora)
        .bind(&new.servicio)
        .bind(&new.nombre)
        .bind(&new.email)
        .bind(&new.telefono)
        .bind(&new.direccion)
        .bind(&new.notas)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn list_citas(&self, filtro: CitaFiltro) -> RepoResult<Vec<Cita>> {
        sqlx::query_as::<_, Cita>(&format!(
            "SELECT {CITA_COLUMNS} FROM citas \
             WHERE ($1::BIGINT IS NULL OR usuario_id = $1) AND ($2::BIGINT IS NULL OR auto_id = $2) ORDER BY id"
        ))
        .bind(filtro.usuario_id)
        .bind(filtro.auto_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}

#[async_trait]
impl VentaRepo for PgRepo {
    async fn create_venta(&self, new: NewVenta) -> RepoResult<Venta> {
        sqlx::query_as::<_, Venta>(&format!(
            "INSERT INTO ventas (auto_id, usuario_id, monto, moneda, estado, session_id) \
             VALUES ($1,$2,$3,$4,$5,$6) RETURNING {VENTA_COLUMNS}"
        ))
        .bind(new.auto_id)
        .bind(new.usuario_id)
        .bind(new.monto)
        .bind(&new.moneda)
        .bind(ESTADO_PAGADA)
        .bind(&new.session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn get_venta_by_session(&self, session_id: &str) -> RepoResult<Venta> {
        sqlx::query_as::<_, Venta>(&format!("SELECT {VENTA_COLUMNS} FROM ventas WHERE session_id=$1"))
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
    }

    async fn list_ventas(&self, filtro: VentaFiltro) -> RepoResult<Vec<Venta>> {
        sqlx::query_as::<_, Venta>(&format!(
            "SELECT {VENTA_COLUMNS} FROM ventas WHERE ($1::BIGINT IS NULL OR usuario_id = $1) ORDER BY id"
        ))
        .bind(filtro.usuario_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}
