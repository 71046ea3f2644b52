pub mod credentials;
pub mod redaction;

pub use credentials::{Credential, CredentialError, CredentialPools, parse_key_list};
pub use redaction::{RedactingWriter, redact_secrets};
