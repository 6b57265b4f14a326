/// Interest flags indicating which readiness to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    /// Interest in readable events.
    pub const READABLE: Interest = Interest(0b01);
    /// Interest in writable events.
    pub const WRITABLE: Interest = Interest(0b10);

    const NONE: Interest = Interest(0);

    /// Returns true if readable interest is set.
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns true if writable interest is set.
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Returns true if no interest is set.
    pub const fn is_empty(self) -> bool {
        self.0 == Self::NONE.0
    }

    /// Combine two interests.
    #[must_use]
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    pub(crate) const fn from_flags(readable: bool, writable: bool) -> Self {
        let mut bits = 0;
        if readable {
            bits |= Self::READABLE.0;
        }
        if writable {
            bits |= Self::WRITABLE.0;
        }
        Interest(bits)
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::Interest;

    #[test]
    fn combine_and_query() {
        let both = Interest::READABLE | Interest::WRITABLE;
        assert!(both.is_readable());
        assert!(both.is_writable());
        assert!(!Interest::READABLE.is_writable());
        assert!(Interest::from_flags(false, false).is_empty());
        assert_eq!(Interest::from_flags(true, false), Interest::READABLE);
    }
}
