//! The text area: a fixed `columns x rows` viewport over a scrollback
//! buffer (spec §3's "Text area" data model, §4.e's scroll discipline).

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::output::rgb_to_pc_color;

pub struct TextArea {
    pub columns: u16,
    pub rows: u16,
    /// 1 in text mode, 2 in graphics mode.
    pub bytes_per_char: u8,

    pub cursor_row: u16,
    pub cursor_col: u16,
    pub cursor_visible: bool,

    /// `rows + scrollback budget`.
    pub max_buffer_lines: u32,
    /// Lines ever written, saturating at `max_buffer_lines` once the
    /// ring has wrapped.
    scrollback_lines_written: u32,
    /// How many lines back from "now" the view currently shows; 0 = at
    /// the bottom.
    scrolled_back_lines: u32,

    pub foreground_rgb: u32,
    pub background_rgb: u32,

    /// The owned scrollback buffer, line-per-entry (stands in for the
    /// packed `columns*bytesPerChar`-wide byte rows the original keeps;
    /// functionally the same ring, addressed by line instead of by byte
    /// offset).
    lines: Vec<String>,

    pub charset: String,
    pub no_scroll: bool,
}

impl TextArea {
    pub fn new(columns: u16, rows: u16, bytes_per_char: u8, scrollback_budget: u32) -> Self {
        TextArea {
            columns,
            rows,
            bytes_per_char,
            cursor_row: 0,
            cursor_col: 0,
            cursor_visible: true,
            max_buffer_lines: rows as u32 + scrollback_budget,
            scrollback_lines_written: 0,
            scrolled_back_lines: 0,
            foreground_rgb: 0xAAAAAA,
            background_rgb: 0x000000,
            lines: Vec::new(),
            charset: String::from("ASCII"),
            no_scroll: false,
        }
    }

    pub fn pc_foreground(&self) -> u8 {
        rgb_to_pc_color(self.foreground_rgb)
    }

    pub fn pc_background(&self) -> u8 {
        rgb_to_pc_color(self.background_rgb)
    }

    /// Appends one logical line. If the ring is full, the oldest line is
    /// dropped. Any in-progress scrollback view snaps back to the bottom
    /// (spec §4.e: "a fresh write implicitly scrolls forward to now").
    pub fn write_line(&mut self, text: &str) {
        let truncated = if text.len() > self.columns as usize { &text[..self.columns as usize] } else { text };
        self.lines.push(truncated.to_string());
        if self.lines.len() as u32 > self.max_buffer_lines {
            self.lines.remove(0);
        }
        self.scrollback_lines_written = self.scrollback_lines_written.saturating_add(1).min(self.max_buffer_lines);
        self.scrolled_back_lines = 0;
    }

    pub fn write_lines<'a, I: IntoIterator<Item = &'a str>>(&mut self, texts: I) {
        for t in texts {
            self.write_line(t);
        }
    }

    /// Moves the view by `delta` screens (negative = further back into
    /// scrollback, positive = toward the bottom), clamped to
    /// `[0, stored_lines.saturating_sub(rows)]`. A no-op when
    /// `no_scroll` is set.
    pub fn scroll(&mut self, delta_screens: i32) {
        if self.no_scroll {
            return;
        }
        let delta_lines = delta_screens.saturating_mul(self.rows as i32);
        let max_back = (self.lines.len() as i32 - self.rows as i32).max(0) as u32;
        let current = self.scrolled_back_lines as i32;
        let next = (current - delta_lines).clamp(0, max_back as i32);
        self.scrolled_back_lines = next as u32;
    }

    pub fn scrolled_back_lines(&self) -> u32 {
        self.scrolled_back_lines
    }

    /// The `rows` lines currently visible, oldest first.
    pub fn visible(&self) -> Vec<&str> {
        let total = self.lines.len() as u32;
        let bottom_index = total.saturating_sub(self.scrolled_back_lines);
        let top_index = bottom_index.saturating_sub(self.rows as u32);
        self.lines[top_index as usize..bottom_index as usize].iter().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn fresh_write_snaps_view_to_bottom() {
        let mut area = TextArea::new(40, 5, 1, 100);
        for n in 0..20 {
            area.write_line(&format!("LINE {n}"));
        }
        area.scroll(-2);
        assert_ne!(area.scrolled_back_lines(), 0);
        area.write_line("LINE 20");
        assert_eq!(area.scrolled_back_lines(), 0);
        assert_eq!(*area.visible().last().unwrap(), "LINE 20");
    }

    #[test]
    fn scroll_back_one_screen_shows_the_prior_window() {
        let mut area = TextArea::new(40, 5, 1, 100);
        for n in 0..20 {
            area.write_line(&format!("LINE {n}"));
        }
        // Bottom view (rows=5) shows LINE 15..LINE 19.
        assert_eq!(area.visible(), alloc::vec!["LINE 15", "LINE 16", "LINE 17", "LINE 18", "LINE 19"]);
        area.scroll(-1);
        assert_eq!(area.visible(), alloc::vec!["LINE 10", "LINE 11", "LINE 12", "LINE 13", "LINE 14"]);
    }

    #[test]
    fn scrollback_ring_evicts_oldest_lines_past_budget() {
        let mut area = TextArea::new(40, 5, 1, 10); // max_buffer_lines = 15
        for n in 0..30 {
            area.write_line(&format!("LINE {n}"));
        }
        area.scroll(-3); // as far back as the ring allows
        assert_eq!(*area.visible().first().unwrap(), "LINE 15");
    }

    #[test]
    fn no_scroll_flag_disables_scrolling() {
        let mut area = TextArea::new(40, 5, 1, 100);
        for n in 0..20 {
            area.write_line(&format!("LINE {n}"));
        }
        area.no_scroll = true;
        area.scroll(-2);
        assert_eq!(area.scrolled_back_lines(), 0);
    }
}
