//! Filename normalization for incoming uploads.
//!
//! Scene-style names such as `Movie.2019.1080p.BluRay.x264-GROUP.mkv` are
//! reduced to a short, filesystem-safe form (`Movie_2019.mkv`) before the file
//! is moved into the staging area.

/// Substrings stripped from the stem, applied in order until none remain
const NOISE_TOKENS: &[&str] = &[
    ".avi", "576p", "1280x544", "720p", "1080p", "BluRay", "DTS", "DVBrip", "DVB", "DD5.1", "P1",
    "P2", "MVO", "448", "5-1", "WEB-DLRip", "DVDScr", "HDDVDRip", "tvrip", "SATrip", "SATRip",
    "HDTVRip", "BDRip", "BDrip", "Bluray", "DVDRip", "DVDrip", "HDRip", "DVDRIP", "TVRip", "SAT",
    "CD", "BR", "R1", "R5", "HANSMER", "by.Seven", "HQCLUB", "HQ", "ivanes", "ViDEO", "srt", "SRT",
    "aac", "AAC", "ac3", "AC3", ".AVC", "AVC", ".avc", "x264", "H264", "h264", "XviD", "Xvid",
    "xvid", "DivX", "divx", "Divx", ".rus", ".eng", "RUS", "ENG", "Rus", "Eng", "Subs", "Sub",
    ".sub", ".subs", "SUBS", "Dub", "DUB", "ELEKTRI4KA", "ru-en-enCom", "rus-eng", "by.minik",
    "ь", "ъ", "+", "2x", "tRu", "DUAL", "[rutracker.org]", "[torrents.ru]", "[Youtracker]", "KAMO",
    "th0r", "[", "]", "PuzKarapuz", "NNM-CLUB", "[apreder]", "HELLYWOOD", "BestVideo",
    "ShareReactor.ru", "soperedi", "'", "«", "»", "......", ".....", "....", "...", "..", "`", "!",
];

/// Separator runs collapsed into a single underscore, longest first
const SEPARATORS: &[&str] = &[
    "____", "___", "__", " ", "...", "..", ".", "(", ")", ",", "-", "&",
];

/// Characters that end the segment a release tag hangs off
const SEGMENT_BREAKS: &[char] = &[' ', '.', '_', '(', ')', '[', ']', ','];

/// Used when every character of the stem turned out to be noise
const EMPTY_STEM: &str = "untitled";

/// Normalize an upload's file name. Total and deterministic.
pub fn normalize(name: &str) -> String {
    let (stem, ext) = split_extension(name);

    // Transliteration can spell out Latin noise (Дуб -> Dub), so clean twice
    let stem = clean(&transliterate(&clean(stem)));
    let stem = if stem.is_empty() { EMPTY_STEM.to_string() } else { stem };

    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// Noise removal, separator collapse and trailing `_` strip
fn clean(stem: &str) -> String {
    let mut stem = collapse_separators(strip_noise(stem));
    if stem.ends_with('_') {
        stem.pop();
    }
    stem
}

/// Split `name` at its last `.`; a name without one has no extension
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
        None => (name, None),
    }
}

fn contains_noise(stem: &str) -> bool {
    NOISE_TOKENS.iter().any(|t| stem.contains(t))
}

/// Drop a trailing `-GROUP` release tag, as in `x264-GROUP`.
///
/// Only fires when the segment right before the `-` is itself a noise token.
fn strip_release_group(stem: &str) -> &str {
    let Some(idx) = stem.rfind('-') else {
        return stem;
    };
    let group = &stem[idx + 1..];
    if group.is_empty() || !group.chars().all(|c| c.is_ascii_alphanumeric()) {
        return stem;
    }

    let head = &stem[..idx];
    let segment = match head.rfind(|c: char| SEGMENT_BREAKS.contains(&c)) {
        Some(pos) => &head[pos + 1..],
        None => head,
    };
    if NOISE_TOKENS.contains(&segment) {
        head
    } else {
        stem
    }
}

fn strip_noise(stem: &str) -> String {
    let mut out = strip_release_group(stem).to_string();
    while contains_noise(&out) {
        for token in NOISE_TOKENS {
            out = out.replace(token, "");
        }
    }
    out
}

fn collapse_separators(mut stem: String) -> String {
    while SEPARATORS.iter().any(|s| stem.contains(s)) {
        for sep in SEPARATORS {
            stem = stem.replace(sep, "_");
        }
    }
    stem
}

fn transliterate(s: &str) -> String {
    s.chars().map(latin_for).collect()
}

fn latin_for(c: char) -> char {
    match c {
        'а' => 'a', 'б' => 'b', 'в' => 'v', 'г' => 'g', 'д' => 'd', 'е' => 'e', 'ё' => 'e',
        'ж' => 'j', 'з' => 'z', 'и' => 'i', 'й' => 'j', 'к' => 'k', 'л' => 'l', 'м' => 'm',
        'н' => 'n', 'о' => 'o', 'п' => 'p', 'р' => 'r', 'с' => 's', 'т' => 't', 'у' => 'u',
        'ф' => 'f', 'х' => 'h', 'ц' => 'z', 'ч' => 'c', 'ш' => 's', 'щ' => 's', 'ъ' => '_',
        'ы' => 'y', 'ь' => '_', 'э' => 'e', 'ю' => 'u', 'я' => 'a',
        'А' => 'A', 'Б' => 'B', 'В' => 'V', 'Г' => 'G', 'Д' => 'D', 'Е' => 'E', 'Ё' => 'E',
        'Ж' => 'J', 'З' => 'Z', 'И' => 'I', 'Й' => 'J', 'К' => 'K', 'Л' => 'L', 'М' => 'M',
        'Н' => 'N', 'О' => 'O', 'П' => 'P', 'Р' => 'R', 'С' => 'S', 'Т' => 'T', 'У' => 'U',
        'Ф' => 'F', 'Х' => 'H', 'Ц' => 'Z', 'Ч' => 'C', 'Ш' => 'S', 'Щ' => 'S', 'Ъ' => '_',
        'Ы' => 'Y', 'Ь' => '_', 'Э' => 'E', 'Ю' => 'U', 'Я' => 'A',
        other => other,
    }
}
