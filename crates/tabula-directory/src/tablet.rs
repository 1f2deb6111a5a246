//! Tablets: token ranges with their replica sets.

use std::fmt::{self, Display};

use tabula_types::{HostId, Replica, Token};

use crate::error::{DirectoryError, DirectoryResult};

/// A half-open token range `(first, last]` and the replicas that store it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tablet {
    first_token: Token,
    last_token: Token,
    replicas: Vec<Replica>,
}

impl Tablet {
    /// Creates a tablet.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::InvalidRange`] unless `first < last`.
    pub fn new(first: Token, last: Token, replicas: Vec<Replica>) -> DirectoryResult<Self> {
        if first >= last {
            return Err(DirectoryError::InvalidRange { first, last });
        }
        Ok(Self {
            first_token: first,
            last_token: last,
            replicas,
        })
    }

    /// Exclusive lower bound.
    pub fn first_token(&self) -> Token {
        self.first_token
    }

    /// Inclusive upper bound.
    pub fn last_token(&self) -> Token {
        self.last_token
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Returns true if `token` lies in `(first, last]`.
    pub fn contains(&self, token: Token) -> bool {
        self.first_token < token && token <= self.last_token
    }

    /// Returns true if any replica lives on `host`.
    pub fn has_host(&self, host: HostId) -> bool {
        self.replicas.iter().any(|r| r.host_id() == host)
    }
}

impl Display for Tablet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}] [", self.first_token, self.last_token)?;
        for (i, replica) in self.replicas.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{replica}")?;
        }
        f.write_str("]")
    }
}
