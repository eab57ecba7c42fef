/// Virtual screen state reconstructed from a terminal byte stream.
///
/// Models a fixed viewport of `rows` x `cols` character cells plus an
/// unbounded scrollback of rows that scrolled past the top. The final
/// rendered text is scrollback followed by the visible grid, in
/// chronological order.
#[derive(Debug, Clone)]
pub struct Screen {
    cols: usize,
    rows: usize,
    grid: Vec<Vec<char>>,
    row: usize,
    col: usize,
    scrollback: Vec<String>,
}

const TAB_WIDTH: usize = 8;

impl Screen {
    pub fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            grid: vec![vec![' '; cols]; rows],
            row: 0,
            col: 0,
            scrollback: Vec::new(),
        }
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Write a character at the cursor, wrapping at the column limit.
    pub fn put(&mut self, c: char) {
        if self.col >= self.cols {
            self.carriage_return();
            self.line_feed();
        }
        self.grid[self.row][self.col] = c;
        self.col += 1;
    }

    pub fn carriage_return(&mut self) {
        self.col = 0;
    }

    pub fn line_feed(&mut self) {
        if self.row + 1 == self.rows {
            self.scroll_up();
        } else {
            self.row += 1;
        }
    }

    pub fn backspace(&mut self) {
        self.col = self.col.saturating_sub(1);
    }

    pub fn tab(&mut self) {
        let next = (self.col / TAB_WIDTH + 1) * TAB_WIDTH;
        self.col = next.min(self.cols - 1);
    }

    /// Push the top visible row into scrollback and shift the grid up.
    fn scroll_up(&mut self) {
        let top = row_text(&self.grid[0]);
        self.scrollback.push(top);
        self.grid.remove(0);
        self.grid.push(vec![' '; self.cols]);
    }

    pub fn move_up(&mut self, n: usize) {
        self.row = self.row.saturating_sub(n);
    }

    pub fn move_down(&mut self, n: usize) {
        self.row = (self.row + n).min(self.rows - 1);
    }

    pub fn move_left(&mut self, n: usize) {
        self.col = self.col.saturating_sub(n);
    }

    pub fn move_right(&mut self, n: usize) {
        self.col = (self.col + n).min(self.cols - 1);
    }

    /// Absolute move, zero-based, clamped to the viewport.
    pub fn goto(&mut self, row: usize, col: usize) {
        self.row = row.min(self.rows - 1);
        self.col = col.min(self.cols - 1);
    }

    pub fn goto_col(&mut self, col: usize) {
        self.col = col.min(self.cols - 1);
    }

    pub fn goto_row(&mut self, row: usize) {
        self.row = row.min(self.rows - 1);
    }

    /// EL: 0 = cursor to end, 1 = start through cursor, 2 = whole line.
    pub fn erase_line(&mut self, mode: u16) {
        let (start, end) = match mode {
            0 => (self.col.min(self.cols), self.cols),
            1 => (0, (self.col + 1).min(self.cols)),
            _ => (0, self.cols),
        };
        for cell in &mut self.grid[self.row][start..end] {
            *cell = ' ';
        }
    }

    /// ED: 0 = cursor to end of screen, 1 = top through cursor, 2/3 = all.
    ///
    /// A full clear does not push the visible grid into scrollback; screen
    /// redraws would otherwise duplicate their content in the transcript.
    pub fn erase_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_line(0);
                for r in &mut self.grid[self.row + 1..] {
                    for cell in r.iter_mut() {
                        *cell = ' ';
                    }
                }
            }
            1 => {
                for r in &mut self.grid[..self.row] {
                    for cell in r.iter_mut() {
                        *cell = ' ';
                    }
                }
                self.erase_line(1);
            }
            _ => {
                for r in &mut self.grid {
                    for cell in r.iter_mut() {
                        *cell = ' ';
                    }
                }
            }
        }
    }

    /// Scrollback plus visible grid as plain text. Rows are right-trimmed
    /// and runs of blank lines are collapsed to a single blank line, so the
    /// same byte stream always renders to identical output.
    pub fn contents(&self) -> String {
        let mut lines: Vec<String> = self.scrollback.clone();
        lines.extend(self.grid.iter().map(|r| row_text(r)));
        collapse_lines(&lines)
    }
}

/// Join rows, squeezing runs of blank lines down to one and trimming the
/// blank edges. Shared by the emulator and the strip-ansi fallback so both
/// produce the same whitespace shape.
pub(crate) fn collapse_lines(lines: &[String]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut blank_run = 0usize;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    out.join("\n").trim_matches('\n').to_string()
}

fn row_text(row: &[char]) -> String {
    let text: String = row.iter().collect();
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_str(screen: &mut Screen, s: &str) {
        for c in s.chars() {
            screen.put(c);
        }
    }

    #[test]
    fn test_overwrite_replaces_cells() {
        let mut screen = Screen::new(20, 5);
        write_str(&mut screen, "ABC");
        screen.move_left(3);
        write_str(&mut screen, "XYZ");
        assert_eq!(screen.contents(), "XYZ");
    }

    #[test]
    fn test_carriage_return_overwrite() {
        let mut screen = Screen::new(20, 5);
        write_str(&mut screen, "loading...");
        screen.carriage_return();
        write_str(&mut screen, "done      ");
        assert_eq!(screen.contents(), "done");
    }

    #[test]
    fn test_line_wrap_at_column_width() {
        let mut screen = Screen::new(4, 5);
        write_str(&mut screen, "abcdef");
        assert_eq!(screen.contents(), "abcd\nef");
    }

    #[test]
    fn test_scrollback_accumulates() {
        let mut screen = Screen::new(10, 2);
        for i in 0..5 {
            write_str(&mut screen, &format!("line{i}"));
            screen.carriage_return();
            screen.line_feed();
        }
        assert_eq!(screen.contents(), "line0\nline1\nline2\nline3\nline4");
    }

    #[test]
    fn test_erase_line_to_end() {
        let mut screen = Screen::new(20, 5);
        write_str(&mut screen, "hello world");
        screen.goto_col(5);
        screen.erase_line(0);
        assert_eq!(screen.contents(), "hello");
    }

    #[test]
    fn test_erase_display_keeps_scrollback() {
        let mut screen = Screen::new(10, 2);
        for i in 0..4 {
            write_str(&mut screen, &format!("line{i}"));
            screen.carriage_return();
            screen.line_feed();
        }
        screen.erase_display(2);
        // line0..line2 already scrolled off the top; the visible rows are gone
        assert_eq!(screen.contents(), "line0\nline1\nline2");
    }

    #[test]
    fn test_blank_run_compression() {
        let mut screen = Screen::new(10, 8);
        write_str(&mut screen, "top");
        for _ in 0..5 {
            screen.carriage_return();
            screen.line_feed();
        }
        write_str(&mut screen, "bottom");
        assert_eq!(screen.contents(), "top\n\nbottom");
    }

    #[test]
    fn test_goto_clamps_to_viewport() {
        let mut screen = Screen::new(10, 4);
        screen.goto(100, 100);
        assert_eq!(screen.cursor(), (3, 9));
    }

    #[test]
    fn test_tab_advances_to_next_stop() {
        let mut screen = Screen::new(20, 2);
        screen.put('a');
        screen.tab();
        screen.put('b');
        assert_eq!(screen.contents(), "a       b");
    }
}
