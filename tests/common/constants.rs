//! Shared constants for end-to-end tests

// ============================================================================
// Fake Controller Credentials
// ============================================================================

/// The administrator the fake controller accepts
pub const ADMIN_USER: &str = "admin";

/// Password for [`ADMIN_USER`]
pub const ADMIN_PASS: &str = "secret";

/// Token issued to [`ADMIN_USER`]
pub const ADMIN_TOKEN: &str = "token-admin";

/// A user without administrator rights
#[allow(dead_code)]
pub const VIEWER_USER: &str = "viewer";

/// Password for [`VIEWER_USER`]
#[allow(dead_code)]
pub const VIEWER_PASS: &str = "viewer-pass";

/// Token issued to [`VIEWER_USER`]
pub const VIEWER_TOKEN: &str = "token-viewer";

// ============================================================================
// Fake Controller Data
// ============================================================================

#[allow(dead_code)]
pub const LAB_1_ID: &str = "lab-1";
#[allow(dead_code)]
pub const LAB_1_TITLE: &str = "Alpha";
#[allow(dead_code)]
pub const LAB_2_ID: &str = "lab-2";
#[allow(dead_code)]
pub const LAB_2_OWNER: &str = "bob";

// ============================================================================
// Timeouts
// ============================================================================

/// How long to wait for spawned servers to accept requests
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;
