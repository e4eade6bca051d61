//! Model-specific firmware workarounds
//!
//! Some shipped firmware misreports capabilities. Corrections live in this
//! one table of model-pattern to override entries, applied once at the end
//! of negotiation; call sites never compare model strings themselves.

use super::capability::{ColorProfile, DeviceCapabilities, Extent};

/// One capability override, applied when the model name contains the pattern
pub struct Quirk {
    pub model_pattern: &'static str,
    pub note: &'static str,
    apply: fn(&mut DeviceCapabilities),
}

/// Known-good ADF extent for models whose firmware over-reports it
const CS8400F_ADF_EXTENT: Extent = Extent {
    width: 2550,
    height: 4200,
};

/// Factory sensor correction matrix for film models that ship without
/// onboard color correction
#[rustfmt::skip]
const CS9300UF_PROFILE: ColorProfile = ColorProfile([
     1.07, -0.05, -0.02,
    -0.06,  1.11, -0.05,
     0.00, -0.07,  1.07,
]);

static QUIRKS: &[Quirk] = &[
    Quirk {
        model_pattern: "CS-8400F",
        note: "firmware reports an ADF area larger than the physical tray",
        apply: |caps| {
            if let Some(adf) = caps.adf.as_mut() {
                adf.extent = CS8400F_ADF_EXTENT;
            }
        },
    },
    Quirk {
        model_pattern: "CS-1200U",
        note: "red and blue channels arrive swapped",
        apply: |caps| {
            caps.swap_channels = true;
        },
    },
    Quirk {
        model_pattern: "CS-9300UF",
        note: "raw sensor colors need the factory correction profile",
        apply: |caps| {
            caps.color_profile = CS9300UF_PROFILE.clone();
        },
    },
];

/// Apply every matching quirk to a freshly negotiated capability record
pub fn apply(caps: &mut DeviceCapabilities) {
    for quirk in QUIRKS {
        if caps.model.contains(quirk.model_pattern) {
            log::info!("Applying quirk for {}: {}", quirk.model_pattern, quirk.note);
            (quirk.apply)(caps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capability::{AdfCapabilities, ColorProfile, CommandLevel};

    fn base_caps(model: &str) -> DeviceCapabilities {
        DeviceCapabilities {
            model: model.to_string(),
            level: CommandLevel::Standard(4),
            resolutions: vec![300, 600],
            min_resolution: 300,
            max_resolution: 600,
            optical_resolution: 600,
            depths: vec![1, 8],
            max_depth: 8,
            flatbed: Extent {
                width: 2550,
                height: 3600,
            },
            adf: Some(AdfCapabilities {
                extent: Extent {
                    width: 9999,
                    height: 9999,
                },
                duplex: false,
            }),
            tpu: None,
            focus: false,
            max_line_distance: 0,
            needs_color_reorder: false,
            double_vertical: false,
            swap_channels: false,
            color_profile: ColorProfile::default(),
        }
    }

    #[test]
    fn test_adf_extent_corrected() {
        let mut caps = base_caps("CS-8400F");
        apply(&mut caps);
        assert_eq!(caps.adf.unwrap().extent, CS8400F_ADF_EXTENT);
    }

    #[test]
    fn test_channel_swap_flagged() {
        let mut caps = base_caps("CS-1200U Film");
        apply(&mut caps);
        assert!(caps.swap_channels);
    }

    #[test]
    fn test_film_model_gets_color_profile() {
        let mut caps = base_caps("CS-9300UF");
        apply(&mut caps);
        assert!(!caps.color_profile.is_identity());
        assert_eq!(caps.color_profile, CS9300UF_PROFILE);
    }

    #[test]
    fn test_unmatched_model_untouched() {
        let mut caps = base_caps("CS-3000");
        apply(&mut caps);
        assert!(!caps.swap_channels);
        assert!(caps.color_profile.is_identity());
        assert_eq!(caps.adf.unwrap().extent.width, 9999);
    }
}
