//! Username synthesis
//!
//! IAM user names are rendered from a configurable template. Caller-supplied
//! names are normalized first so the result only ever contains characters
//! IAM accepts, and the rendered name is rejected if it exceeds IAM's
//! 64-character limit rather than silently truncated.

mod template;

pub use template::{Field, Function, ParseError, Position, RenderError, UsernameTemplate};

use crate::core::UsernameError;

/// IAM's hard limit on user name length
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Template used when the root configuration does not set one
pub const DEFAULT_USERNAME_TEMPLATE: &str = r#"{{ printf "vault-%s-%s-%s" (printf "%s-%s" (.DisplayName) (.PolicyName) | truncate 42) (unix_time) (random 20) | truncate 64 }}"#;

/// Identity type exposed to templates as `.Type`
pub const IDENTITY_TYPE: &str = "IAM";

/// Values a username template renders against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameMetadata {
    /// `.Type`
    pub kind: String,
    /// `.DisplayName`, normalized
    pub display_name: String,
    /// `.PolicyName`, normalized
    pub policy_name: String,
}

impl UsernameMetadata {
    /// Build metadata for an IAM user, normalizing both names
    pub fn new(display_name: &str, policy_name: &str) -> Self {
        Self {
            kind: IDENTITY_TYPE.to_string(),
            display_name: normalize_name(display_name),
            policy_name: normalize_name(policy_name),
        }
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '=' | ',' | '.' | '@' | '_' | '-')
}

/// Replace every character outside `[A-Za-z0-9+=,.@_-]` with `_`
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect()
}

/// Render a username for the given display and policy names
///
/// # Example
///
/// ```
/// use ecr_credential::username::generate_username;
///
/// let name = generate_username("alice smith", "readers", "{{ .Type }}-{{ .DisplayName }}").unwrap();
/// assert_eq!(name, "IAM-alice_smith");
/// ```
pub fn generate_username(
    display_name: &str,
    policy_name: &str,
    template: &str,
) -> Result<String, UsernameError> {
    let parsed =
        UsernameTemplate::new(template).map_err(|e| UsernameError::Template(e.to_string()))?;

    let metadata = UsernameMetadata::new(display_name, policy_name);
    let username = parsed
        .render(&metadata)
        .map_err(|e| UsernameError::Generation(e.to_string()))?;

    let length = username.chars().count();
    if length > MAX_USERNAME_LENGTH {
        return Err(UsernameError::LengthExceeded {
            length,
            max: MAX_USERNAME_LENGTH,
        });
    }
    Ok(username)
}
