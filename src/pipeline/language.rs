//! Language routing: user-facing language names and aliases to Tesseract codes.

/// A supported OCR language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    /// Canonical id, e.g. `kannada`.
    pub id: &'static str,
    /// Tesseract traineddata code, e.g. `kan`.
    pub tesseract: &'static str,
    aliases: &'static [&'static str],
}

pub const ENGLISH: LanguageProfile = LanguageProfile {
    id: "english",
    tesseract: "eng",
    aliases: &["eng", "en"],
};

pub const PROFILES: [LanguageProfile; 5] = [
    ENGLISH,
    LanguageProfile {
        id: "kannada",
        tesseract: "kan",
        aliases: &["kan", "kn"],
    },
    LanguageProfile {
        id: "hindi",
        tesseract: "hin",
        aliases: &["hin", "hi"],
    },
    LanguageProfile {
        id: "tamil",
        tesseract: "tam",
        aliases: &["tam", "ta"],
    },
    LanguageProfile {
        id: "telugu",
        tesseract: "tel",
        aliases: &["tel", "te"],
    },
];

/// Resolve a language name or alias. Unknown values fall back to English.
pub fn resolve(language: &str) -> &'static LanguageProfile {
    let wanted = language.trim().to_lowercase();
    PROFILES
        .iter()
        .find(|p| p.id == wanted || p.aliases.iter().any(|a| *a == wanted))
        .unwrap_or(&PROFILES[0])
}

/// Tesseract `-l` argument for a possibly `+`-joined language list.
///
/// `"kn+en"` becomes `"kan+eng"`; duplicates collapse.
pub fn tesseract_codes(language: &str) -> String {
    let mut codes: Vec<&'static str> = Vec::new();
    for part in language.split('+').filter(|p| !p.trim().is_empty()) {
        let code = resolve(part).tesseract;
        if !codes.contains(&code) {
            codes.push(code);
        }
    }
    if codes.is_empty() {
        return ENGLISH.tesseract.to_string();
    }
    codes.join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_profiles() {
        assert_eq!(resolve("kn").id, "kannada");
        assert_eq!(resolve(" Kannada ").tesseract, "kan");
        assert_eq!(resolve("te").tesseract, "tel");
        assert_eq!(resolve("eng").id, "english");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(resolve("klingon"), &ENGLISH);
        assert_eq!(tesseract_codes(""), "eng");
    }

    #[test]
    fn joined_languages_map_each_part() {
        assert_eq!(tesseract_codes("kn+en"), "kan+eng");
        assert_eq!(tesseract_codes("hindi+hi"), "hin");
    }
}
