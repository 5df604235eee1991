//! Sticky one-shot modifier composition.
//!
//! On-screen keyboards have no physical ctrl/alt/meta, so the client keeps
//! sticky flags that apply to the next keystroke batch and then clear.

/// One of the sticky modifier keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKey {
    Ctrl,
    Alt,
    Meta,
}

/// Sticky modifier flags, all one-shot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModifierState {
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl ModifierState {
    /// Arm a modifier for the next composed keystroke.
    pub fn set(&mut self, key: ModifierKey) {
        match key {
            ModifierKey::Ctrl => self.ctrl = true,
            ModifierKey::Alt => self.alt = true,
            ModifierKey::Meta => self.meta = true,
        }
    }

    /// Any modifier armed.
    pub fn any(&self) -> bool {
        self.ctrl || self.alt || self.meta
    }

    /// Compose a keystroke string into the bytes to transmit.
    ///
    /// Newlines become carriage returns first (the PTY line discipline
    /// expects `\r`). Ctrl folds letters into C0 controls; alt/meta prefix a
    /// single ESC. All flags clear after composition.
    pub fn compose(&mut self, input: &str) -> Vec<u8> {
        let normalized = input.replace('\n', "\r");

        let mut out: Vec<u8> = Vec::with_capacity(normalized.len() + 1);
        if self.ctrl {
            for c in normalized.chars() {
                let upper = c.to_ascii_uppercase();
                if upper.is_ascii_uppercase() {
                    out.push(upper as u8 - 0x40);
                } else {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        } else {
            out.extend_from_slice(normalized.as_bytes());
        }

        if self.alt || self.meta {
            out.insert(0, 0x1b);
        }

        self.ctrl = false;
        self.alt = false;
        self.meta = false;
        out
    }
}
