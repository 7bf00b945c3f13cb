use std::fmt;

/// Scalar drawn from the database-wide change counter. Every statement
/// boundary and row action is stamped with one; commit timestamps come
/// from the same counter. Zero is never issued and doubles as "not yet
/// committed".
pub type TxTimestamp = u64;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident($prim:ty)) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $prim);

        impl From<$prim> for $name {
            fn from(value: $prim) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $prim {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_type! {
    /// Identifies a session for the lifetime of the database value.
    SessionId(u32)
}

id_type! {
    /// Identifier of a row within one store. Memory-resident rows get
    /// these from the store's monotone sequence.
    RowId(u64)
}

id_type! {
    /// Position of a row in the disk-backed cache of a promoted store.
    FilePos(u64)
}
