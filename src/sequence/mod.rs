//! Symbols, node chains and the two chain generators
//!
//! A symbol is a `(location, object)` pair written as a two-digit code
//! (`"13"` = location 1, object 3). A node chain is one trial's stimulus
//! sequence; its consecutive symbols form the ordered pairs (edges) that
//! coverage is counted on.

mod balanced;
mod debruijn;

pub use balanced::balanced_conditions;
pub use debruijn::{debruijn_indices, oneback_chains, ONEBACK_MAX_PAIRS, ONEBACK_MIN_PAIRS};

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of stimulus locations
pub const LOCATIONS: u8 = 2;

/// Number of object identities
pub const OBJECTS: u8 = 4;

/// Separator between symbols in a node-chain code (`00_13_11`)
pub const NODE_SEPARATOR: char = '_';

/// Separator between pairs in a pair list (`00_13,13_11`)
pub const PAIR_SEPARATOR: char = ',';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("sequence length must be >= 2, got {0}")]
    ChainTooShort(usize),

    #[error("requested {requested} unique pairs, valid range is [{min}, {max}]")]
    PairCountOutOfRange {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("ntcs and nobjs must be positive (ntcs={ntcs}, nobjs={nobjs})")]
    EmptyRequest { ntcs: usize, nobjs: usize },

    #[error("{requested} unique conditions of {nobjs} objects requested, only {available} exist")]
    Infeasible {
        requested: usize,
        nobjs: usize,
        available: u128,
    },

    #[error("bad symbol '{0}' (expected two digits 'lo')")]
    BadSymbol(String),

    #[error("out-of-range symbol '{0}'")]
    SymbolOutOfRange(String),
}

/// Object category: objects 0-1 are category 0, objects 2-3 category 1
pub fn category(obj: u8) -> u8 {
    if obj <= 1 {
        0
    } else {
        1
    }
}

/// Reference image index for an object shown at an angle
pub fn reference(obj: u8, ang: u8) -> u8 {
    obj * 2 + ang
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    loc: u8,
    obj: u8,
}

impl Symbol {
    pub fn new(loc: u8, obj: u8) -> Result<Self, SequenceError> {
        if loc >= LOCATIONS || obj >= OBJECTS {
            return Err(SequenceError::SymbolOutOfRange(format!("{}{}", loc, obj)));
        }
        Ok(Self { loc, obj })
    }

    pub fn loc(&self) -> u8 {
        self.loc
    }

    pub fn obj(&self) -> u8 {
        self.obj
    }

    pub fn category(&self) -> u8 {
        category(self.obj)
    }

    /// All 8 symbols, location-major: 00 01 02 03 10 11 12 13
    pub fn alphabet() -> Vec<Symbol> {
        (0..LOCATIONS)
            .flat_map(|loc| (0..OBJECTS).map(move |obj| Symbol { loc, obj }))
            .collect()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.loc, self.obj)
    }
}

impl FromStr for Symbol {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(SequenceError::BadSymbol(s.to_string()));
        }
        Symbol::new(bytes[0] - b'0', bytes[1] - b'0')
    }
}

/// Ordered sequence of symbols making up one trial
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodeChain(Vec<Symbol>);

impl NodeChain {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Self(symbols)
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consecutive ordered pairs (edges)
    pub fn pairs(&self) -> Vec<(Symbol, Symbol)> {
        self.0.windows(2).map(|w| (w[0], w[1])).collect()
    }

    /// `00_13_11`
    pub fn nodes_code(&self) -> String {
        self.0
            .iter()
            .map(Symbol::to_string)
            .collect::<Vec<_>>()
            .join(&NODE_SEPARATOR.to_string())
    }

    /// `00_13,13_11`
    pub fn pairs_code(&self) -> String {
        self.pairs()
            .iter()
            .map(|(a, b)| pair_code(*a, *b))
            .collect::<Vec<_>>()
            .join(&PAIR_SEPARATOR.to_string())
    }
}

impl fmt::Display for NodeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nodes_code())
    }
}

impl FromStr for NodeChain {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        s.split(NODE_SEPARATOR)
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

pub fn pair_code(a: Symbol, b: Symbol) -> String {
    format!("{}{}{}", a, NODE_SEPARATOR, b)
}

/// Parse a `00_13` pair code
pub fn parse_pair(code: &str) -> Result<(Symbol, Symbol), SequenceError> {
    let (left, right) = code
        .split_once(NODE_SEPARATOR)
        .ok_or_else(|| SequenceError::BadSymbol(code.to_string()))?;
    Ok((left.parse()?, right.parse()?))
}
