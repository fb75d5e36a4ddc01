//! Class-name classification

const WEAPON_KEYWORDS: [&str; 3] = ["knife", "gun", "weapon"];

/// Whether a class name denotes a weapon.
///
/// Case-insensitive substring match on `knife`, `gun` and `weapon`. Labels
/// such as `pistol` are deliberately not matched.
pub fn is_weapon_match(class_name: &str) -> bool {
    let lowered = class_name.to_lowercase();
    WEAPON_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

/// Whether an object counts as dangerous for the local heuristic report.
///
/// Broader than [`is_weapon_match`]: sharp tools such as scissors count too.
pub fn is_dangerous_object(class_name: &str) -> bool {
    is_weapon_match(class_name) || class_name.to_lowercase().contains("scissors")
}
