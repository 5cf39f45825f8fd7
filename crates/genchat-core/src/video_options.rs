use genchat_contracts::ProviderId;

pub const DEFAULT_VEO_MODEL: &str = "veo_3_1";
pub const DEFAULT_SORA_MODEL: &str = "sora-2";
pub const VEO_MODELS: &[&str] = &["veo_3_1", "veo_3_1-fast", "veo_3_1-fl", "veo_3_1-fast-fl"];

pub const SORA_DURATIONS: &[u32] = &[10, 15];
pub const VEO_DURATIONS: &[u32] = &[4, 6, 8];
pub const VEO_REFERENCE_DURATIONS: &[u32] = &[8];

/// Models forced to a single duration once a reference image is attached.
const VEO_REFERENCE_LOCKED_MODELS: &[&str] = &["veo_3_1", "veo_3_1-fast"];

/// Legal durations in seconds, lowest first. `None` when duration does not apply.
///
/// Both the request builders and any option listing must go through this so
/// they never disagree.
pub fn allowed_durations(
    provider: ProviderId,
    model: &str,
    has_reference_image: bool,
) -> Option<&'static [u32]> {
    match provider {
        ProviderId::NanoBananaPro => None,
        ProviderId::Sora => Some(SORA_DURATIONS),
        ProviderId::Veo => {
            if has_reference_image && VEO_REFERENCE_LOCKED_MODELS.contains(&model) {
                Some(VEO_REFERENCE_DURATIONS)
            } else {
                Some(VEO_DURATIONS)
            }
        }
    }
}

/// Substitutes the first legal duration for anything outside the allow-list.
pub fn clamp_duration(
    provider: ProviderId,
    requested: u32,
    model: &str,
    has_reference_image: bool,
) -> Option<u32> {
    let allowed = allowed_durations(provider, model, has_reference_image)?;
    if allowed.contains(&requested) { Some(requested) } else { allowed.first().copied() }
}

pub fn default_video_model(provider: ProviderId) -> Option<&'static str> {
    match provider {
        ProviderId::NanoBananaPro => None,
        ProviderId::Veo => Some(DEFAULT_VEO_MODEL),
        ProviderId::Sora => Some(DEFAULT_SORA_MODEL),
    }
}

/// Keeps the selected model when it belongs to the provider's family.
pub fn resolve_video_model(provider: ProviderId, selected: &str) -> Option<String> {
    let default = default_video_model(provider)?;
    let selected = selected.trim();
    let family = match provider {
        ProviderId::Veo => "veo",
        ProviderId::Sora => "sora",
        ProviderId::NanoBananaPro => return None,
    };
    if selected.starts_with(family) {
        Some(selected.to_string())
    } else {
        Some(default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_duration_is_always_legal_and_deterministic() {
        let models = ["veo_3_1", "veo_3_1-fast", "veo_3_1-fl", "veo_3_1-fast-fl", "sora-2"];
        for provider in [ProviderId::Veo, ProviderId::Sora] {
            for model in models {
                for has_reference in [false, true] {
                    let allowed = allowed_durations(provider, model, has_reference)
                        .expect("video providers have durations");
                    for requested in 0..=20 {
                        let first = clamp_duration(provider, requested, model, has_reference);
                        let second = clamp_duration(provider, requested, model, has_reference);
                        assert_eq!(first, second);
                        let value = first.expect("clamp must yield a value");
                        assert!(
                            allowed.contains(&value),
                            "{provider}/{model}/{has_reference}: {requested} -> {value}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn reference_image_locks_selected_veo_models_to_eight_seconds() {
        assert_eq!(allowed_durations(ProviderId::Veo, "veo_3_1", true), Some(&[8][..]));
        assert_eq!(allowed_durations(ProviderId::Veo, "veo_3_1-fast", true), Some(&[8][..]));
        assert_eq!(allowed_durations(ProviderId::Veo, "veo_3_1-fl", true), Some(VEO_DURATIONS));
        assert_eq!(allowed_durations(ProviderId::Veo, "veo_3_1", false), Some(VEO_DURATIONS));
        assert_eq!(clamp_duration(ProviderId::Veo, 4, "veo_3_1", true), Some(8));
    }

    #[test]
    fn illegal_duration_becomes_lowest_legal_value() {
        assert_eq!(clamp_duration(ProviderId::Sora, 15, "sora-2", false), Some(15));
        assert_eq!(clamp_duration(ProviderId::Sora, 8, "sora-2", false), Some(10));
        assert_eq!(clamp_duration(ProviderId::Veo, 0, "veo_3_1", false), Some(4));
    }

    #[test]
    fn image_provider_has_no_durations() {
        assert_eq!(allowed_durations(ProviderId::NanoBananaPro, "", false), None);
        assert_eq!(clamp_duration(ProviderId::NanoBananaPro, 10, "", true), None);
    }

    #[test]
    fn foreign_model_names_fall_back_to_provider_default() {
        assert_eq!(resolve_video_model(ProviderId::Sora, "veo_3_1").as_deref(), Some("sora-2"));
        assert_eq!(
            resolve_video_model(ProviderId::Veo, "veo_3_1-fl").as_deref(),
            Some("veo_3_1-fl")
        );
        assert_eq!(resolve_video_model(ProviderId::Veo, "").as_deref(), Some("veo_3_1"));
        assert_eq!(resolve_video_model(ProviderId::NanoBananaPro, "veo_3_1"), None);
    }
}
