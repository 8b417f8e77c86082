use std::fmt;

use anyhow::{Result, anyhow, bail};

pub const DEFAULT_WIDTH: usize = 10;
pub const DEFAULT_HEIGHT: usize = 10;

/// Largest column count whose letters still fit in two characters (`ZZ`).
pub const MAX_WIDTH: usize = 26 + 26 * 26;

/// Zero-based (column, row) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub col: usize,
    pub row: usize,
}

impl Address {
    pub const fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }

    pub const ORIGIN: Address = Address::new(0, 0);

    /// Parse an A1-style reference (`B3` -> col 1, row 2). Case-insensitive.
    pub fn parse_reference(s: &str) -> Option<Address> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_alphabetic())?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || letters.len() > 2 || digits.is_empty() {
            return None;
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let col = letters_to_col(letters)?;
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Address::new(col, row - 1))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_letters(self.col), self.row + 1)
    }
}

/// Column label: 0 -> "A", 25 -> "Z", 26 -> "AA".
pub fn col_letters(col: usize) -> String {
    let mut out = String::new();
    let mut n = col;
    loop {
        out.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out
}

fn letters_to_col(letters: &str) -> Option<usize> {
    let mut n = 0usize;
    for b in letters.bytes() {
        let v = (b.to_ascii_uppercase().checked_sub(b'A')? as usize) + 1;
        if v > 26 {
            return None;
        }
        n = n * 26 + v;
    }
    n.checked_sub(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
}

impl Default for GridSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl GridSize {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("grid dimensions must be at least 1x1 (got {width}x{height})");
        }
        if width > MAX_WIDTH {
            bail!("grid width {width} exceeds the maximum of {MAX_WIDTH} columns");
        }
        Ok(Self { width, height })
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.col < self.width && addr.row < self.height
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Row-major iteration over every address in the grid.
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        (0..self.height).flat_map(move |row| (0..self.width).map(move |col| Address::new(col, row)))
    }

    /// Move `from` one step in `dir`, clamping each axis into the grid.
    pub fn step(&self, from: Address, dir: Direction) -> Address {
        let (dc, dr) = dir.delta();
        Address::new(
            clamp_offset(from.col, dc, self.width),
            clamp_offset(from.row, dr, self.height),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }
}

/// `value + delta` clamped into `[0, len)`. `len` must be non-zero.
pub fn clamp_offset(value: usize, delta: isize, len: usize) -> usize {
    debug_assert!(len > 0);
    let moved = if delta.is_negative() {
        value.saturating_sub(delta.unsigned_abs())
    } else {
        value.saturating_add(delta as usize)
    };
    moved.min(len - 1)
}

/// Parse a `REF=SOURCE` seed such as `B2==A1*2`.
pub fn parse_seed(s: &str) -> Result<(Address, String)> {
    let (reference, source) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected REF=SOURCE, got {s:?}"))?;
    let addr = Address::parse_reference(reference)
        .ok_or_else(|| anyhow!("invalid cell reference {reference:?}"))?;
    Ok((addr, source.to_string()))
}
