/// Errors raised by the domain core.
///
/// The resolver and dimension calculator never fail; only user-authored
/// structured input (workflow documents, names) is rejected here.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
