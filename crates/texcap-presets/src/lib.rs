use texcap_core::DEFAULT_TARGET_CAP;

#[derive(Debug, Clone)]
pub struct TargetPreset {
    pub label: String,
    pub cap: u32,
}

pub fn default_presets() -> Vec<TargetPreset> {
    [128, 256, 512, 1024, 2048, 4096]
        .into_iter()
        .map(|cap| TargetPreset {
            label: format!("{cap}px"),
            cap,
        })
        .collect()
}

pub fn describe(presets: &[TargetPreset]) -> String {
    presets
        .iter()
        .map(|p| {
            if p.cap == DEFAULT_TARGET_CAP {
                format!("{} (default)", p.label)
            } else {
                p.label.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
