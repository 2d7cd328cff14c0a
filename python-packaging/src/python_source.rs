// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Utility functions related to Python source code. */

use {anyhow::Result, once_cell::sync::Lazy, std::borrow::Cow};

static RE_CODING: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r"^[ \t\f]*#.*?coding[:=][ \t]*([-_.a-zA-Z0-9]+)")
        .expect("coding regex is valid")
});

/// Derive the source encoding from Python source code.
pub fn python_source_encoding(source: &[u8]) -> Vec<u8> {
    // Default source encoding is UTF-8. But per PEP 263, the first or second
    // line of source can match a regular expression to define a custom
    // encoding.
    let lines = source.split(|v| v == &b'\n');

    for (i, line) in lines.enumerate() {
        if i > 1 {
            break;
        }

        if let Some(m) = RE_CODING.captures(line).and_then(|caps| caps.get(1)) {
            return m.as_bytes().to_vec();
        }
    }

    b"utf-8".to_vec()
}

/// Decode Python source code to text honoring its declared encoding.
pub fn decode_python_source(source: &[u8]) -> Cow<'_, str> {
    let encoding = python_source_encoding(source);

    let encoder = match encoding_rs::Encoding::for_label(&encoding) {
        Some(encoder) => encoder,
        None => encoding_rs::UTF_8,
    };

    let (source, ..) = encoder.decode(source);

    source
}

/// Whether __file__ occurs in Python source code.
pub fn has_dunder_file(source: &[u8]) -> Result<bool> {
    // We can't just look for b"__file__ because the source file may be in
    // encodings like UTF-16. So we need to decode to Unicode first then look for
    // the code points.
    Ok(decode_python_source(source).contains("__file__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_declaration() {
        assert_eq!(python_source_encoding(b"import os\n"), b"utf-8".to_vec());
        assert_eq!(
            python_source_encoding(b"#!/usr/bin/env python\n# -*- coding: latin-1 -*-\n"),
            b"latin-1".to_vec()
        );
        // Only the first two lines count.
        assert_eq!(
            python_source_encoding(b"\n\n# coding: latin-1\n"),
            b"utf-8".to_vec()
        );
    }

    #[test]
    fn dunder_file_detection() -> Result<()> {
        assert!(has_dunder_file(b"here = os.path.dirname(__file__)\n")?);
        assert!(!has_dunder_file(b"import os\n")?);
        assert!(has_dunder_file(
            b"# -*- coding: latin-1 -*-\nname = '\xe9'\nprint(__file__)\n"
        )?);

        Ok(())
    }
}
