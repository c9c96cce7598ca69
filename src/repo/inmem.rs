use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;

// Ids only grow, so BTreeMap iteration order is insertion order.
#[derive(Default, Serialize, Deserialize)]
struct State {
    autos: BTreeMap<Id, Auto>,
    usuarios: BTreeMap<Id, UsuarioConCredencial>,
    comentarios: BTreeMap<Id, Comentario>,
    citas: BTreeMap<Id, Cita>,
    ventas: BTreeMap<Id, Venta>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    /// Fill in `respuestas` from the comments pointing at `c`.
    fn with_respuestas(&self, c: &Comentario) -> Comentario {
        let mut out = c.clone();
        out.respuestas = self
            .comentarios
            .values()
            .filter(|r| r.parent_id == Some(c.id))
            .map(|r| r.id)
            .collect();
        out
    }
}

/// Process-local store, optionally mirrored to a JSON snapshot after every write.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
    /// Serialises snapshot writers so an older state never lands after a newer one.
    persist_lock: Arc<tokio::sync::Mutex<()>>,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists and keep writing snapshots there.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_state_from(&path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(Arc::new(path)),
            persist_lock: Arc::default(),
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!("loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                    State::default()
                }
            },
            Err(e) => {
                info!("no snapshot at '{}' ({e}); starting empty", path.display());
                State::default()
            }
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    // Snapshot failures are logged, never surfaced: the in-memory write already happened.
    async fn persist(&self) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let _guard = self.persist_lock.lock().await;
        let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                warn!("failed to serialize snapshot: {e}");
                return;
            }
            Err(e) => {
                warn!("failed to read state for snapshot: {e}");
                return;
            }
        };
        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("failed to create snapshot dir '{}': {e}", dir.display());
            }
        }
        // Write beside the target and rename so readers never see a torn file.
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            warn!("failed to write snapshot '{}': {e}", tmp.display());
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            warn!("failed to move snapshot into '{}': {e}", path.display());
        }
    }
}

#[async_trait]
impl AutoRepo for InMemRepo {
    async fn list_autos(&self) -> RepoResult<Vec<Auto>> {
        Ok(self.read()?.autos.values().cloned().collect())
    }

    async fn get_auto(&self, id: Id) -> RepoResult<Auto> {
        self.read()?.autos.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn create_auto(&self, new: NewAuto) -> RepoResult<Auto> {
        let auto = { // scoped so the lock is released before persisting
            let mut s = self.write()?;
            let id = s.next_id();
            let auto = new.into_auto(id);
            s.autos.insert(id, auto.clone());
            auto
        };
        self.persist().await;
        Ok(auto)
    }

    async fn replace_auto(&self, id: Id, new: NewAuto) -> RepoResult<Auto> {
        let auto = {
            let mut s = self.write()?;
            let slot = s.autos.get_mut(&id).ok_or(RepoError::NotFound)?;
            *slot = new.into_auto(id);
            let auto = slot.clone();
            auto
        };
        self.persist().await;
        Ok(auto)
    }

    async fn update_auto(&self, id: Id, upd: UpdateAuto) -> RepoResult<Auto> {
        let updated = {
            let mut s = self.write()?;
            let auto = s.autos.get_mut(&id).ok_or(RepoError::NotFound)?;
            upd.apply(auto);
            let updated = auto.clone();
            updated
        };
        self.persist().await;
        Ok(updated)
    }

    async fn delete_auto(&self, id: Id) -> RepoResult<()> {
        {
            let mut s = self.write()?;
            s.autos.remove(&id).ok_or(RepoError::NotFound)?;
        }
        self.persist().await;
        Ok(())
    }
}

#[async_trait]
impl UsuarioRepo for InMemRepo {
    async fn create_usuario(&self, new: NewUsuario) -> RepoResult<Usuario> {
        let email = normalize_email(&new.email);
        let usuario = {
            let mut s = self.write()?;
            if s.usuarios.values().any(|u| u.usuario.email == email) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let usuario = Usuario {
                id,
                email,
                nombre: new.nombre,
                rol: new.rol,
                telefono: None,
                direccion: None,
                imagen: None,
                creado_en: Utc::now(),
            };
            s.usuarios.insert(id, UsuarioConCredencial { usuario: usuario.clone(), password_hash: new.password_hash });
            usuario
        };
        self.persist().await;
        Ok(usuario)
    }

    async fn find_credentials(&self, email: &str) -> RepoResult<UsuarioConCredencial> {
        let email = normalize_email(email);
        self.read()?
            .usuarios
            .values()
            .find(|u| u.usuario.email == email)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_usuario(&self, id: Id) -> RepoResult<Usuario> {
        self.read()?.usuarios.get(&id).map(|u| u.usuario.clone()).ok_or(RepoError::NotFound)
    }

    async fn list_usuarios(&self) -> RepoResult<Vec<Usuario>> {
        Ok(self.read()?.usuarios.values().map(|u| u.usuario.clone()).collect())
    }

    async fn usuarios_by_ids(&self, ids: &[Id]) -> RepoResult<Vec<Usuario>> {
        let s = self.read()?;
        Ok(ids.iter().filter_map(|id| s.usuarios.get(id)).map(|u| u.usuario.clone()).collect())
    }

    async fn update_perfil(&self, id: Id, upd: UpdateUsuario, imagen: Option<String>) -> RepoResult<Usuario> {
        let updated = {
            let mut s = self.write()?;
            let u = &mut s.usuarios.get_mut(&id).ok_or(RepoError::NotFound)?.usuario;
            if let Some(v) = upd.nombre { u.nombre = v; }
            if let Some(v) = upd.telefono { u.telefono = Some(v); }
            if let Some(v) = upd.direccion { u.direccion = Some(v); }
            if let Some(v) = imagen { u.imagen = Some(v); }
            let updated = u.clone();
            updated
        };
        self.persist().await;
        Ok(updated)
    }

    async fn clear_imagen(&self, id: Id) -> RepoResult<Usuario> {
        let updated = {
            let mut s = self.write()?;
            let u = &mut s.usuarios.get_mut(&id).ok_or(RepoError::NotFound)?.usuario;
            u.imagen = None;
            let updated = u.clone();
            updated
        };
        self.persist().await;
        Ok(updated)
    }

    async fn delete_usuario(&self, id: Id) -> RepoResult<Usuario> {
        let removed = {
            let mut s = self.write()?;
            let removed = s.usuarios.remove(&id).ok_or(RepoError::NotFound)?;
            removed
        };
        self.persist().await;
        Ok(removed.usuario)
    }
}

#[async_trait]
impl ComentarioRepo for InMemRepo {
    async fn list_comentarios(&self, auto_id: Id) -> RepoResult<Vec<Comentario>> {
        let s = self.read()?;
        Ok(s.comentarios
            .values()
            .filter(|c| c.auto_id == auto_id)
            .map(|c| s.with_respuestas(c))
            .collect())
    }

    async fn get_comentario(&self, id: Id) -> RepoResult<Comentario> {
        let s = self.read()?;
        let c = s.comentarios.get(&id).ok_or(RepoError::NotFound)?;
        Ok(s.with_respuestas(c))
    }

    async fn create_comentario(&self, new: NewComentario) -> RepoResult<Comentario> {
        let comentario = {
            let mut s = self.write()?;
            if let Some(parent_id) = new.parent_id {
                match s.comentarios.get(&parent_id) {
                    Some(p) if p.auto_id == new.auto_id => {}
                    Some(_) => return Err(RepoError::Invalid("parentId pertenece a otro auto".into())),
                    None => return Err(RepoError::Invalid(format!("parentId {parent_id} no existe"))),
                }
            }
            let id = s.next_id();
            let comentario = Comentario {
                id,
                auto_id: new.auto_id,
                usuario_id: new.usuario_id,
                nombre_anonimo: new.nombre_anonimo,
                contenido: new.contenido,
                calificacion: new.calificacion,
                parent_id: new.parent_id,
                respuestas: Vec::new(),
                fecha: Utc::now(),
            };
            s.comentarios.insert(id, comentario.clone());
            comentario
        };
        self.persist().await;
        Ok(comentario)
    }

    async fn update_comentario(&self, id: Id, upd: UpdateComentario) -> RepoResult<Comentario> {
        let updated = {
            let mut s = self.write()?;
            let c = s.comentarios.get_mut(&id).ok_or(RepoError::NotFound)?;
            c.contenido = upd.contenido;
            c.calificacion = upd.calificacion;
            let snapshot = c.clone();
            let updated = s.with_respuestas(&snapshot);
            updated
        };
        self.persist().await;
        Ok(updated)
    }
}

#[async_trait]
impl CitaRepo for InMemRepo {
    async fn create_cita(&self, new: NewCita) -> RepoResult<Cita> {
        let cita = {
            let mut s = self.write()?;
            let id = s.next_id();
            let cita = Cita {
                id,
                auto_id: new.auto_id,
                usuario_id: new.usuario_id,
                fecha: new.fecha,
                hora: new.hora,
                servicio: new.servicio,
                nombre: new.nombre,
                email: new.email,
                telefono: new.telefono,
                direccion: new.direccion,
                notas: new.notas,
                creada_en: Utc::now(),
            };
            s.citas.insert(id, cita.clone());
            cita
        };
        self.persist().await;
        Ok(cita)
    }

    async fn list_citas(&self, filtro: CitaFiltro) -> RepoResult<Vec<Cita>> {
        Ok(self
            .read()?
            .citas
            .values()
            .filter(|c| filtro.usuario_id.map_or(true, |u| c.usuario_id == u))
            .filter(|c| filtro.auto_id.map_or(true, |a| c.auto_id == a))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VentaRepo for InMemRepo {
    async fn create_venta(&self, new: NewVenta) -> RepoResult<Venta> {
        let venta = {
            let mut s = self.write()?;
            if s.ventas.values().any(|v| v.session_id == new.session_id) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let venta = Venta {
                id,
                auto_id: new.auto_id,
                usuario_id: new.usuario_id,
                monto: new.monto,
                moneda: new.moneda,
                estado: ESTADO_PAGADA.to_string(),
                session_id: new.session_id,
                fecha: Utc::now(),
            };
            s.ventas.insert(id, venta.clone());
            venta
        };
        self.persist().await;
        Ok(venta)
    }

    async fn get_venta_by_session(&self, session_id: &str) -> RepoResult<Venta> {
        self.read()?
            .ventas
            .values()
            .find(|v| v.session_id == session_id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn list_ventas(&self, filtro: VentaFiltro) -> RepoResult<Vec<Venta>> {
        Ok(self
            .read()?
            .ventas
            .values()
            .filter(|v| filtro.usuario_id.map_or(true, |u| v.usuario_id == Some(u)))
            .cloned()
            .collect())
    }
}
