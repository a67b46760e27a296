/// Maximum invite code length.
pub const MAX_INVITE_CODE_LENGTH: usize = 32;

/// Number of trailing characters hidden when an invite code is shown.
const CENSORED_SUFFIX: usize = 3;

/// Validate an invite code. Must be 1-32 chars, ASCII alphanumeric + hyphen.
pub fn validate_invite_code(code: &str) -> Result<(), String> {
    if code.is_empty() {
        return Err("Invite code cannot be empty".into());
    }
    if code.len() > MAX_INVITE_CODE_LENGTH {
        return Err(format!(
            "Invite code too long (max {} characters)",
            MAX_INVITE_CODE_LENGTH
        ));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("Invite code can only contain letters, numbers, and hyphens".into());
    }
    Ok(())
}

/// Accept a bare invite code or an invite URL and return the code.
pub fn normalize_invite_code(input: &str) -> &str {
    let trimmed = input.trim().trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Validate a snowflake id supplied by an admin.
pub fn validate_snowflake(kind: &str, id: u64) -> Result<(), String> {
    if id == 0 {
        return Err(format!("{kind} id is invalid"));
    }
    Ok(())
}

/// Hide the last characters of an invite code so it can be shown in a
/// public channel without handing out the invite.
pub fn censor_invite_code(code: &str) -> String {
    let len = code.chars().count();
    let keep = len.saturating_sub(CENSORED_SUFFIX);
    let visible: String = code.chars().take(keep).collect();
    format!("{visible}{}", "•".repeat(len - keep))
}
