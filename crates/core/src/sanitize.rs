//! Filename sanitization for stage outputs.
//!
//! Display names arrive as arbitrary user input (often with accents); stage
//! output filenames must stay within `[A-Za-z0-9._-]` so they survive URLs,
//! shells, and every filesystem we care about.

/// Sanitize a display name into a safe filename stem.
///
/// Folds Latin diacritics to ASCII, replaces every character outside
/// `[A-Za-z0-9.-]` with `_`, collapses runs of replacements, and trims
/// leading/trailing underscores.
pub fn sanitize_stem(name: &str) -> String {
    let mut folded = String::with_capacity(name.len());
    for c in name.chars() {
        fold_char(c, &mut folded);
    }

    let mut out = String::with_capacity(folded.len());
    let mut pending_sep = false;
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            // Everything else (including literal underscores) collapses
            // into a single separator.
            pending_sep = true;
        }
    }
    out
}

/// Fold one character's common Latin diacritics to ASCII.
///
/// Characters with no mapping are pushed unchanged; the caller's filter
/// pass replaces whatever non-ASCII survives.
fn fold_char(c: char, out: &mut String) {
    let folded: &str = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'ç' => "c",
        'Ç' => "C",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'ñ' => "n",
        'Ñ' => "N",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "O",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' => "U",
        'ý' | 'ÿ' => "y",
        'Ý' => "Y",
        'æ' => "ae",
        'Æ' => "AE",
        'œ' => "oe",
        'Œ' => "OE",
        'ß' => "ss",
        _ => {
            out.push(c);
            return;
        }
    };
    out.push_str(folded);
}
