//! Structural classification of Windows security identifiers.
//!
//! Only the shape of an identifier is inspected; nothing here consults the
//! case. Identifiers that do not look like a SID at all are treated as opaque
//! and pass validation.

use std::sync::OnceLock;

use regex::Regex;

/// Realm address shared by every host's built-in service account realm.
pub const WELL_KNOWN_REALM_ADDRESS: &str = "SPECIAL_WINDOWS_ACCOUNTS";

/// Built-in service identities. They are individual principals, but every
/// machine has them, so they never identify a shared realm.
const WELL_KNOWN_ACCOUNTS: &[&str] = &["S-1-5-18", "S-1-5-19", "S-1-5-20"];

const WELL_KNOWN_ACCOUNT_PREFIXES: &[&str] = &[
    "S-1-5-80-", // services
    "S-1-5-82-", // IIS application pools
    "S-1-5-83-", // virtual machines
    "S-1-5-90-", // window manager
    "S-1-5-96-", // font drivers
];

/// Well-known identifiers that name a group or pseudo-principal.
const WELL_KNOWN_GROUPS: &[&str] = &[
    "S-1-0-0", // Nobody
    "S-1-1-0", // Everyone
    "S-1-2-0", "S-1-2-1", "S-1-3-0", "S-1-3-1", "S-1-3-2", "S-1-3-3", "S-1-3-4", "S-1-5-1",
    "S-1-5-2", "S-1-5-3", "S-1-5-4", "S-1-5-6", "S-1-5-7", "S-1-5-8", "S-1-5-9", "S-1-5-10",
    "S-1-5-11", "S-1-5-12", "S-1-5-13", "S-1-5-14", "S-1-5-15", "S-1-5-32", "S-1-5-1000",
];

/// Builtin domain aliases such as Administrators (`S-1-5-32-544`).
const BUILTIN_DOMAIN_PREFIX: &str = "S-1-5-32-";

const DOMAIN_PREFIX: &str = "S-1-5-21-";

/// Domain-relative ids of well-known domain groups (Domain Admins, Domain
/// Users, Schema Admins, ...).
const DOMAIN_GROUP_RIDS: &[u32] = &[512, 513, 514, 515, 516, 517, 518, 519, 520, 553];

fn sid_pattern() -> &'static Regex {
    static SID: OnceLock<Regex> = OnceLock::new();
    SID.get_or_init(|| Regex::new(r"^S-1-\d+(-\d+)*$").expect("SID pattern compiles"))
}

fn canonical(sid: &str) -> String {
    sid.trim().to_uppercase()
}

/// Returns true if `sid` is shaped like a Windows security identifier.
#[must_use]
pub fn is_sid(sid: &str) -> bool {
    sid_pattern().is_match(&canonical(sid))
}

/// Returns true for built-in service accounts whose realm is per host.
#[must_use]
pub fn is_well_known(sid: &str) -> bool {
    let sid = canonical(sid);
    WELL_KNOWN_ACCOUNTS.contains(&sid.as_str())
        || WELL_KNOWN_ACCOUNT_PREFIXES
            .iter()
            .any(|prefix| sid.starts_with(prefix))
}

/// Address of the realm an account identifier belongs to: the identifier
/// without its final sub-authority, or [`WELL_KNOWN_REALM_ADDRESS`] for
/// built-in service accounts.
#[must_use]
pub fn realm_address(sid: &str) -> String {
    if is_well_known(sid) {
        return WELL_KNOWN_REALM_ADDRESS.to_string();
    }
    let sid = canonical(sid);
    match sid.rsplit_once('-') {
        Some((prefix, _)) => prefix.to_string(),
        None => sid,
    }
}

/// Checks that `sid` can own an account.
///
/// # Errors
/// Returns the reason when `sid` structurally denotes a group rather than an
/// individual principal.
pub fn validate_user_sid(sid: &str) -> Result<(), &'static str> {
    let sid = canonical(sid);
    if !sid_pattern().is_match(&sid) {
        return Ok(());
    }
    if WELL_KNOWN_GROUPS.contains(&sid.as_str()) {
        return Err("well-known group identifier");
    }
    if sid.starts_with(BUILTIN_DOMAIN_PREFIX) {
        return Err("builtin domain alias");
    }
    if sid.starts_with(DOMAIN_PREFIX) {
        let rid = sid
            .rsplit_once('-')
            .and_then(|(_, rid)| rid.parse::<u32>().ok());
        if rid.is_some_and(|rid| DOMAIN_GROUP_RIDS.contains(&rid)) {
            return Err("well-known domain group");
        }
    }
    Ok(())
}
