//! Remote file naming

use crate::payload::{Payload, TransferHint};
use crate::{Error, Result};
use uuid::Uuid;

/// Suffix of names generated for payloads that carry none
pub const GENERATED_NAME_SUFFIX: &str = ".msg";

/// Chooses the remote file name for a payload
pub trait FileNameGenerator: Send + Sync {
    /// Name to upload `payload` under
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPath` when no usable name can be produced.
    fn generate(&self, payload: &Payload, hint: &TransferHint) -> Result<String>;
}

impl<F> FileNameGenerator for F
where
    F: Fn(&Payload, &TransferHint) -> Result<String> + Send + Sync,
{
    fn generate(&self, payload: &Payload, hint: &TransferHint) -> Result<String> {
        self(payload, hint)
    }
}

/// Hinted name, then the local file name, then a random `<uuid>.msg`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFileNameGenerator;

impl FileNameGenerator for DefaultFileNameGenerator {
    fn generate(&self, payload: &Payload, hint: &TransferHint) -> Result<String> {
        if let Some(name) = &hint.file_name {
            return Ok(name.clone());
        }

        if let Some(name) = payload
            .path()
            .and_then(|path| path.file_name())
            .and_then(|name| name.to_str())
        {
            return Ok(name.to_string());
        }

        Ok(format!("{}{}", Uuid::new_v4(), GENERATED_NAME_SUFFIX))
    }
}

/// Reject names that would escape the target directory
pub(crate) fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::InvalidPath(format!(
            "'{}' is not a valid remote file name",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_hint_wins() {
        let payload = Payload::File(PathBuf::from("/tmp/local.txt"));
        let name = DefaultFileNameGenerator
            .generate(&payload, &TransferHint::named("remote.txt"))
            .unwrap();
        assert_eq!(name, "remote.txt");
    }

    #[test]
    fn test_file_payload_keeps_its_name() {
        let payload = Payload::File(PathBuf::from("/var/spool/out/batch-7.csv"));
        let name = DefaultFileNameGenerator
            .generate(&payload, &TransferHint::default())
            .unwrap();
        assert_eq!(name, "batch-7.csv");
    }

    #[test]
    fn test_anonymous_payload_gets_generated_name() {
        let name = DefaultFileNameGenerator
            .generate(&Payload::from("body"), &TransferHint::default())
            .unwrap();

        let stem = name.strip_suffix(GENERATED_NAME_SUFFIX).unwrap();
        assert!(Uuid::parse_str(stem).is_ok());
    }

    #[test]
    fn test_closure_generator() {
        let generator = |_: &Payload, _: &TransferHint| Ok::<_, Error>("fixed.dat".to_string());
        let name = generator
            .generate(&Payload::from("x"), &TransferHint::default())
            .unwrap();
        assert_eq!(name, "fixed.dat");
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("out.txt").is_ok());
        assert!(validate_file_name("a/b.txt").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("").is_err());
    }
}
