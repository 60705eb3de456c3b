// Glyph advance widths for the standard Helvetica faces, in 1/1000 em.

const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722,
    667, 611, 722, 667, 944, 667, 667, 611, // A-Z
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333,
    500, 278, 556, 500, 722, 500, 500, 500, // a-z
    334, 260, 334, 584, // '{'..'~'
];

const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    333, 333, 584, 584, 584, 611, 975, // ':'..'@'
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, 667, 778, 722,
    667, 611, 722, 667, 944, 667, 667, 611, // A-Z
    333, 278, 333, 584, 556, 333, // '['..'`'
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, 611, 611, 389,
    556, 333, 611, 556, 778, 556, 556, 500, // a-z
    389, 280, 389, 584, // '{'..'~'
];

// Non-ASCII glyphs are measured as an average lowercase letter.
const FALLBACK_WIDTH: u16 = 556;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFace {
    Regular,
    Bold,
}

impl FontFace {
    pub fn resource_name(self) -> &'static str {
        match self {
            FontFace::Regular => "F1",
            FontFace::Bold => "F2",
        }
    }

    pub fn base_font(self) -> &'static str {
        match self {
            FontFace::Regular => "Helvetica",
            FontFace::Bold => "Helvetica-Bold",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FontMetrics {
    regular: Vec<u16>,
    bold: Vec<u16>,
}

impl FontMetrics {
    pub fn standard() -> Self {
        FontMetrics {
            regular: HELVETICA.to_vec(),
            bold: HELVETICA_BOLD.to_vec(),
        }
    }

    fn char_width(&self, c: char, face: FontFace) -> u16 {
        let table = match face {
            FontFace::Regular => &self.regular,
            FontFace::Bold => &self.bold,
        };
        let code = c as u32;
        if (32..127).contains(&code) {
            table[(code - 32) as usize]
        } else {
            FALLBACK_WIDTH
        }
    }

    /// Width of `text` in points at `size`.
    pub fn text_width(&self, text: &str, face: FontFace, size: f32) -> f32 {
        let units: u32 = text.chars().map(|c| self.char_width(c, face) as u32).sum();
        units as f32 * size / 1000.0
    }

    /// Greedy word wrap. Words wider than the line are split by character.
    pub fn wrap(&self, text: &str, face: FontFace, size: f32, max_width: f32) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut lines = Vec::new();
        let mut current_line = String::new();

        for word in words {
            let test_line = if current_line.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current_line, word)
            };

            if self.text_width(&test_line, face, size) <= max_width {
                current_line = test_line;
                continue;
            }

            if !current_line.is_empty() {
                lines.push(std::mem::take(&mut current_line));
            }

            if self.text_width(word, face, size) <= max_width {
                current_line = word.to_string();
            } else {
                let mut pieces = self.split_word(word, face, size, max_width);
                current_line = pieces.pop().unwrap_or_default();
                lines.extend(pieces);
            }
        }

        // Don't forget the last line
        if !current_line.is_empty() {
            lines.push(current_line);
        }

        lines
    }

    fn split_word(&self, word: &str, face: FontFace, size: f32, max_width: f32) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut piece = String::new();
        for c in word.chars() {
            piece.push(c);
            if self.text_width(&piece, face, size) > max_width && piece.chars().count() > 1 {
                piece.pop();
                pieces.push(std::mem::take(&mut piece));
                piece.push(c);
            }
        }
        if !piece.is_empty() {
            pieces.push(piece);
        }
        pieces
    }
}
