use serde::Serialize;

pub const MIN_HANDLE_LEN: usize = 3;
pub const MAX_HANDLE_LEN: usize = 20;
pub const MIN_DISPLAY_NAME_LEN: usize = 2;
pub const MAX_DISPLAY_NAME_LEN: usize = 30;

/// Handles nobody may register: staff-looking names, our own brand, and the
/// big platforms people might impersonate. Compared case-insensitively.
pub const RESERVED_HANDLES: &[&str] = &[
    "admin", "administrator", "mod", "moderator", "support", "help", "contact",
    "official", "staff", "team", "system", "root", "owner", "founder",
    "lol", "lolapp", "anonymous", "anon", "unknown", "null", "undefined",
    "api", "web", "app", "application", "service", "bot", "robot",
    "test", "demo", "example", "sample", "guest", "user", "users",
    "me", "you", "your", "my", "mine", "our", "we", "us", "them", "they",
    "this", "that", "those", "these", "it", "its", "yourself", "myself",
    "facebook", "twitter", "instagram", "tiktok", "youtube", "google",
    "whatsapp", "telegram", "discord", "snapchat", "reddit", "linkedin", "edward",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Lowercased, trimmed form used as the handle index key.
pub fn normalize_handle(candidate: &str) -> String {
    candidate.trim().to_ascii_lowercase()
}

pub fn is_handle_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_reserved(candidate: &str) -> bool {
    let normalized = normalize_handle(candidate);
    RESERVED_HANDLES.contains(&normalized.as_str())
}

/// Judges a candidate handle. Pure, so it is fine to call on every keystroke.
pub fn validate_handle(candidate: &str) -> HandleValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        errors.push("Handle is required".to_owned());
        return HandleValidation { valid: false, errors, warnings, suggestions };
    }

    let len = trimmed.chars().count();
    if len < MIN_HANDLE_LEN {
        errors.push(format!("Handle must be at least {MIN_HANDLE_LEN} characters"));
    }
    if len > MAX_HANDLE_LEN {
        errors.push(format!("Handle must be at most {MAX_HANDLE_LEN} characters"));
    }
    if !trimmed.chars().all(is_handle_char) {
        errors.push("Handle can only contain letters, numbers, and underscores".to_owned());
    }
    if is_reserved(trimmed) {
        errors.push("This handle is reserved".to_owned());
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        warnings.push("Handle contains only numbers - consider adding letters".to_owned());
    }

    if len == MIN_HANDLE_LEN {
        suggestions.push("Try a longer handle for better uniqueness".to_owned());
    }
    if trimmed.contains('_') {
        suggestions.push("Consider removing underscores for easier sharing".to_owned());
    }

    HandleValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
        suggestions,
    }
}

/// Same report shape as handles, for the name shown next to a handle.
/// Letters, digits, underscores and spaces.
pub fn validate_display_name(name: &str) -> HandleValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    let trimmed = name.trim();
    if trimmed.is_empty() {
        errors.push("Display name is required".to_owned());
        return HandleValidation { valid: false, errors, warnings, suggestions };
    }

    let len = trimmed.chars().count();
    if len < MIN_DISPLAY_NAME_LEN {
        errors.push(format!("Display name must be at least {MIN_DISPLAY_NAME_LEN} characters"));
    }
    if len > MAX_DISPLAY_NAME_LEN {
        errors.push(format!("Display name must be less than {MAX_DISPLAY_NAME_LEN} characters"));
    }
    if !trimmed.chars().all(|c| is_handle_char(c) || c == ' ') {
        errors.push("Display name can only contain letters, numbers, spaces, and underscores".to_owned());
    }

    if trimmed.contains("  ") {
        suggestions.push("Consider removing extra spaces".to_owned());
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        warnings.push("Display name contains only numbers".to_owned());
    }

    HandleValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
        suggestions,
    }
}
