use async_trait::async_trait;

use crate::models::*;

pub mod inmem;
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    /// A write was refused because it would break a data invariant
    /// (e.g. a reply pointing at a comment on another listing).
    #[error("invalid: {0}")] Invalid(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait AutoRepo: Send + Sync {
    async fn list_autos(&self) -> RepoResult<Vec<Auto>>;
    async fn get_auto(&self, id: Id) -> RepoResult<Auto>;
    async fn create_auto(&self, new: NewAuto) -> RepoResult<Auto>;
    async fn replace_auto(&self, id: Id, new: NewAuto) -> RepoResult<Auto>;
    async fn update_auto(&self, id: Id, upd: UpdateAuto) -> RepoResult<Auto>;
    async fn delete_auto(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait UsuarioRepo: Send + Sync {
    /// `Conflict` when the (normalised) email is taken.
    async fn create_usuario(&self, new: NewUsuario) -> RepoResult<Usuario>;
    async fn find_credentials(&self, email: &str) -> RepoResult<UsuarioConCredencial>;
    async fn get_usuario(&self, id: Id) -> RepoResult<Usuario>;
    async fn list_usuarios(&self) -> RepoResult<Vec<Usuario>>;
    async fn usuarios_by_ids(&self, ids: &[Id]) -> RepoResult<Vec<Usuario>>;
    /// Overwrites the provided profile fields and, when given, the image key.
    async fn update_perfil(&self, id: Id, upd: UpdateUsuario, imagen: Option<String>) -> RepoResult<Usuario>;
    async fn clear_imagen(&self, id: Id) -> RepoResult<Usuario>;
    /// Returns the removed account so callers can clean up its image.
    async fn delete_usuario(&self, id: Id) -> RepoResult<Usuario>;
}

#[async_trait]
pub trait ComentarioRepo: Send + Sync {
    /// Every comment on a listing (roots and replies), oldest first.
    async fn list_comentarios(&self, auto_id: Id) -> RepoResult<Vec<Comentario>>;
    async fn get_comentario(&self, id: Id) -> RepoResult<Comentario>;
    /// `Invalid` when `parent_id` does not name a comment on the same listing.
    async fn create_comentario(&self, new: NewComentario) -> RepoResult<Comentario>;
    async fn update_comentario(&self, id: Id, upd: UpdateComentario) -> RepoResult<Comentario>;
}

#[async_trait]
pub trait CitaRepo: Send + Sync {
    async fn create_cita(&self, new: NewCita) -> RepoResult<Cita>;
    async fn list_citas(&self, filtro: CitaFiltro) -> RepoResult<Vec<Cita>>;
}

#[async_trait]
pub trait VentaRepo: Send + Sync {
    /// `Conflict` when a sale for the same checkout session already exists.
    async fn create_venta(&self, new: NewVenta) -> RepoResult<Venta>;
    async fn get_venta_by_session(&self, session_id: &str) -> RepoResult<Venta>;
    async fn list_ventas(&self, filtro: VentaFiltro) -> RepoResult<Vec<Venta>>;
}

pub trait Repo: AutoRepo + UsuarioRepo + ComentarioRepo + CitaRepo + VentaRepo {}

impl<T> Repo for T where T: AutoRepo + UsuarioRepo + ComentarioRepo + CitaRepo + VentaRepo {}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
