use vte::{Params, Parser, Perform};

use crate::{
    config::RenderEngine,
    screen::{Screen, collapse_lines},
    stage::StageError,
};

/// A strategy for turning a raw capture byte stream into readable text.
///
/// `VtEmulator` is the source of truth; `StripAnsiRenderer` is an explicit
/// lower-fidelity fallback. The two are selected by configuration and never
/// mixed within one capture.
pub trait Renderer {
    fn render(&self, bytes: &[u8]) -> Result<String, StageError>;
}

pub fn renderer_for(engine: RenderEngine, cols: usize, rows: usize) -> Box<dyn Renderer> {
    match engine {
        RenderEngine::Emulator => Box::new(VtEmulator { cols, rows }),
        RenderEngine::Strip => Box::new(StripAnsiRenderer),
    }
}

/// Full terminal emulation: interprets cursor movement, erases, wraps and
/// scrollback the way a real terminal would, so redraw-heavy TUI output
/// collapses to what was actually left on screen.
pub struct VtEmulator {
    pub cols: usize,
    pub rows: usize,
}

impl Renderer for VtEmulator {
    fn render(&self, bytes: &[u8]) -> Result<String, StageError> {
        ensure_decodable(bytes)?;
        let mut parser = Parser::new();
        let mut interp = Interp {
            screen: Screen::new(self.cols, self.rows),
        };
        parser.advance(&mut interp, bytes);
        Ok(interp.screen.contents())
    }
}

struct Interp {
    screen: Screen,
}

fn param(params: &Params, idx: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first().copied())
        .unwrap_or(default)
}

/// Movement counts: a missing or zero parameter means 1.
fn count(params: &Params, idx: usize) -> usize {
    param(params, idx, 1).max(1) as usize
}

impl Perform for Interp {
    fn print(&mut self, c: char) {
        self.screen.put(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(),
            0x0a..=0x0c => self.screen.line_feed(),
            0x0d => self.screen.carriage_return(),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        match action {
            'A' => self.screen.move_up(count(params, 0)),
            'B' | 'e' => self.screen.move_down(count(params, 0)),
            'C' | 'a' => self.screen.move_right(count(params, 0)),
            'D' => self.screen.move_left(count(params, 0)),
            'E' => {
                self.screen.move_down(count(params, 0));
                self.screen.carriage_return();
            }
            'F' => {
                self.screen.move_up(count(params, 0));
                self.screen.carriage_return();
            }
            'G' | '`' => self.screen.goto_col(count(params, 0) - 1),
            'd' => self.screen.goto_row(count(params, 0) - 1),
            'H' | 'f' => {
                let row = count(params, 0) - 1;
                let col = count(params, 1) - 1;
                self.screen.goto(row, col);
            }
            'J' => self.screen.erase_display(param(params, 0, 0)),
            'K' => self.screen.erase_line(param(params, 0, 0)),
            // SGR and every unrecognized sequence are consumed, never echoed
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            b'D' => self.screen.line_feed(),
            b'E' => {
                self.screen.carriage_return();
                self.screen.line_feed();
            }
            b'M' => self.screen.move_up(1),
            // charset designation and the rest are no-ops on screen content
            _ => {}
        }
    }
}

/// Fallback renderer: strips escape sequences without modeling a screen,
/// then simulates carriage-return overwrites per line. Cheaper, but cursor
/// repositioning across lines is lost.
pub struct StripAnsiRenderer;

impl Renderer for StripAnsiRenderer {
    fn render(&self, bytes: &[u8]) -> Result<String, StageError> {
        ensure_decodable(bytes)?;
        let stripped = strip_ansi_escapes::strip(bytes);
        let text = String::from_utf8_lossy(&stripped);

        let lines: Vec<String> = text
            .split('\n')
            .map(|line| {
                let mut buf: Vec<char> = Vec::new();
                for seg in line.split('\r') {
                    for (i, c) in seg.chars().enumerate() {
                        if i < buf.len() {
                            buf[i] = c;
                        } else {
                            buf.push(c);
                        }
                    }
                }
                buf.into_iter().collect::<String>().trim_end().to_string()
            })
            .collect();

        Ok(collapse_lines(&lines))
    }
}

/// Reject captures that are not terminal output at all (binary garbage).
/// Heuristic: NUL density and invalid-UTF-8 density over a leading sample.
fn ensure_decodable(bytes: &[u8]) -> Result<(), StageError> {
    const SAMPLE: usize = 8192;
    if bytes.is_empty() {
        return Ok(());
    }
    let sample = &bytes[..bytes.len().min(SAMPLE)];

    let nul = sample.iter().filter(|&&b| b == 0).count();
    if nul * 20 > sample.len() {
        return Err(StageError::Decode(format!(
            "{nul} NUL bytes in first {} bytes",
            sample.len()
        )));
    }

    let invalid: usize = sample
        .utf8_chunks()
        .map(|chunk| chunk.invalid().len())
        .sum();
    if invalid * 10 > sample.len() * 3 {
        return Err(StageError::Decode(format!(
            "{invalid} undecodable bytes in first {} bytes",
            sample.len()
        )));
    }

    Ok(())
}
