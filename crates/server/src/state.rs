use std::sync::Arc;

use hymie_engine::Hymie;
use minijinja::Environment;

use crate::auth::AdminCredentials;
use crate::csrf::CsrfKey;
use crate::error::ServerError;
use crate::render::site_environment;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    hymie: Arc<Hymie>,
    templates: Arc<Environment<'static>>,
    csrf: CsrfKey,
    admins: Arc<AdminCredentials>,
}

impl AppState {
    pub fn new(hymie: Arc<Hymie>) -> Result<Self, ServerError> {
        let secret = &hymie.definition().config.secret;
        let admins = AdminCredentials::load(hymie.app().root(), &secret.admin_password)?;
        Ok(Self {
            csrf: CsrfKey::new(&secret.key),
            templates: Arc::new(site_environment()?),
            admins: Arc::new(admins),
            hymie,
        })
    }

    pub fn hymie(&self) -> &Hymie {
        &self.hymie
    }

    pub fn templates(&self) -> &Environment<'static> {
        &self.templates
    }

    pub fn csrf(&self) -> &CsrfKey {
        &self.csrf
    }

    pub fn admins(&self) -> &AdminCredentials {
        &self.admins
    }
}
