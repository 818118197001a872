//! Query normalization
//!
//! Students write in campus shorthand ("SKS", "KRS", "TA"). Retrieval and
//! classification both work better on the spelled-out form, so every incoming
//! message is expanded before anything else sees it.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Campus abbreviations and their expansions.
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("TA", "tugas akhir"),
    ("Metopen", "metodologi penelitian"),
    ("PA", "pembimbing akademik"),
    ("BNSP", "badan nasional sertifikasi profesi"),
    ("SIA", "sistem informasi akademik"),
    ("MKCU", "mata kuliah ciri universitas"),
    ("MKCF", "mata kuliah ciri fakultas"),
    ("MKPP", "mata kuliah pilihan prodi"),
    ("MKWP", "mata kuliah wajib prodi"),
    ("PKM", "program kreativitas mahasiswa"),
    ("MBKM", "merdeka belajar kampus merdeka"),
    ("MSIB", "magang dan studi independen bersertifikat"),
    ("KP", "kerja praktek"),
    ("SKS", "satuan kredit semester"),
    ("SKPI", "surat keterangan pendamping ijazah"),
    ("KRS", "kartu rencana studi"),
    ("KHS", "kartu hasil studi"),
    ("Matkul", "mata kuliah"),
    ("MK", "mata kuliah"),
];

struct Dictionary {
    pattern: Regex,
    expansions: HashMap<String, &'static str>,
}

fn dictionary() -> &'static Dictionary {
    static DICTIONARY: OnceLock<Dictionary> = OnceLock::new();
    DICTIONARY.get_or_init(|| {
        // Longest keys first so alternation never settles on a shorter prefix.
        let mut keys: Vec<&str> = ABBREVIATIONS.iter().map(|(k, _)| *k).collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        let alternation = keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");

        Dictionary {
            pattern: Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
                .expect("abbreviation pattern is valid"),
            expansions: ABBREVIATIONS
                .iter()
                .map(|(k, v)| (k.to_lowercase(), *v))
                .collect(),
        }
    })
}

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Expand known abbreviations (whole words, any case) and collapse whitespace.
///
/// Text outside of matched abbreviations keeps its original casing.
pub fn normalize(text: &str) -> String {
    let dict = dictionary();
    let expanded = dict.pattern.replace_all(text, |caps: &Captures| {
        let matched = &caps[0];
        dict.expansions
            .get(&matched.to_lowercase())
            .map(|v| v.to_string())
            .unwrap_or_else(|| matched.to_string())
    });

    whitespace().replace_all(&expanded, " ").trim().to_string()
}

/// Strip the WhatsApp bot command prefix (`!tanya <question>`).
pub fn strip_bot_command(text: &str) -> &str {
    let trimmed = text.trim_start();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("!tanya ") => &trimmed[7..],
        _ => trimmed,
    }
}
