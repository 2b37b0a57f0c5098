/// Construction-time settings for a repository store.
///
/// There is intentionally no global configuration: every store instance
/// carries its own copy.
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    /// Identifier recorded on every object created by the store.
    pub repository_id: String,
    /// Principal that bypasses all ACL checks.
    pub admin_principal: String,
    /// Upper bound for a single content stream, unlimited when `None`.
    pub max_content_bytes: Option<u64>,
}

impl RepositoryConfig {
    pub fn new(repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            admin_principal: "Admin".to_string(),
            max_content_bytes: None,
        }
    }

    pub fn with_admin_principal(mut self, principal: impl Into<String>) -> Self {
        self.admin_principal = principal.into();
        self
    }

    pub fn with_max_content_bytes(mut self, limit: u64) -> Self {
        self.max_content_bytes = Some(limit);
        self
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new("repository")
    }
}
