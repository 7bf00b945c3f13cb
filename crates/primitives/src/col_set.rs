use smallvec::SmallVec;
use std::fmt;

/// An ordered set of column positions, kept inline for the common case
/// of a handful of columns. Used for per-column privilege scopes and
/// changed-column masks on row actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ColSet(SmallVec<[u16; 8]>);

impl ColSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, col: u16) {
        if let Err(pos) = self.0.binary_search(&col) {
            self.0.insert(pos, col);
        }
    }

    pub fn contains(&self, col: u16) -> bool {
        self.0.binary_search(&col).is_ok()
    }

    pub fn is_superset(&self, other: &ColSet) -> bool {
        other.0.iter().all(|c| self.contains(*c))
    }

    pub fn union_with(&mut self, other: &ColSet) {
        for c in &other.0 {
            self.insert(*c);
        }
    }

    pub fn remove_all(&mut self, other: &ColSet) {
        self.0.retain(|c| !other.contains(*c));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u16> for ColSet {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        let mut set = Self::new();
        for col in iter {
            set.insert(col);
        }
        set
    }
}

impl fmt::Display for ColSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, col) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, ")")
    }
}
