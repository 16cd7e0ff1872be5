//! Target-language handling for the translation stage.

/// ISO-639-1 codes the translation model can produce, with their NLLB-200 codes.
const NLLB_CODES: &[(&str, &str)] = &[
    ("en", "eng_Latn"),
    ("nl", "nld_Latn"),
    ("fr", "fra_Latn"),
    ("de", "deu_Latn"),
    ("es", "spa_Latn"),
    ("it", "ita_Latn"),
    ("pt", "por_Latn"),
    ("pl", "pol_Latn"),
    ("ru", "rus_Cyrl"),
    ("ja", "jpn_Jpan"),
    ("zh", "zho_Hans"),
    ("ko", "kor_Hang"),
    ("ar", "arb_Arab"),
    ("tr", "tur_Latn"),
    ("sv", "swe_Latn"),
    ("da", "dan_Latn"),
    ("no", "nob_Latn"),
    ("fi", "fin_Latn"),
    ("cs", "ces_Latn"),
    ("el", "ell_Grek"),
    ("he", "heb_Hebr"),
    ("hi", "hin_Deva"),
    ("th", "tha_Thai"),
    ("vi", "vie_Latn"),
    ("id", "ind_Latn"),
    ("ms", "zsm_Latn"),
    ("uk", "ukr_Cyrl"),
    ("ro", "ron_Latn"),
    ("hu", "hun_Latn"),
    ("bg", "bul_Cyrl"),
    ("hr", "hrv_Latn"),
    ("sk", "slk_Latn"),
];

/// Reduce a locale tag to its language: `nl-NL` → `nl`, `en_US` → `en`.
/// An empty tag means English.
pub fn normalize(tag: &str) -> String {
    let lang = tag
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if lang.is_empty() { "en".to_string() } else { lang }
}

pub fn nllb_code(lang: &str) -> Option<&'static str> {
    NLLB_CODES
        .iter()
        .find(|(code, _)| *code == lang)
        .map(|(_, nllb)| *nllb)
}

pub fn is_supported(lang: &str) -> bool {
    nllb_code(lang).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_region() {
        assert_eq!(normalize("nl-NL"), "nl");
        assert_eq!(normalize("en_US"), "en");
        assert_eq!(normalize(" DE "), "de");
        assert_eq!(normalize(""), "en");
    }

    #[test]
    fn nllb_lookup() {
        assert_eq!(nllb_code("nl"), Some("nld_Latn"));
        assert_eq!(nllb_code("ja"), Some("jpn_Jpan"));
        assert_eq!(nllb_code("xx"), None);
        assert!(is_supported("sk"));
        assert!(!is_supported("klingon"));
    }
}
