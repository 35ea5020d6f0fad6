//! Tri-state for values mirrored from the node. Every cache tier stores and
//! returns [RemoteData] so "we never asked" and "the chain says there is no
//! such thing" stay distinguishable.

/// `Unknown` is the lattice bottom: it never wins an [RemoteData::or] and is
/// never persisted. `Absent` is an authoritative "does not exist".
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub enum RemoteData<V> {
    #[default]
    Unknown,
    Absent,
    Cached(V),
}

impl<V> RemoteData<V> {
    /// `self` unless `self` is `Unknown`.
    pub fn or(self, other: Self) -> Self {
        match self {
            RemoteData::Unknown => other,
            loaded => loaded,
        }
    }

    #[inline(always)]
    pub fn loaded(&self) -> bool {
        !matches!(self, RemoteData::Unknown)
    }

    pub fn as_option(&self) -> Option<&V> {
        match self {
            RemoteData::Cached(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            RemoteData::Cached(v) => Some(v),
            _ => None,
        }
    }

    pub fn map_cached<W>(self, f: impl FnOnce(V) -> W) -> RemoteData<W> {
        match self {
            RemoteData::Unknown => RemoteData::Unknown,
            RemoteData::Absent => RemoteData::Absent,
            RemoteData::Cached(v) => RemoteData::Cached(f(v)),
        }
    }
}

impl<V> From<Option<V>> for RemoteData<V> {
    /// An upstream answer: `None` means authoritative absence.
    fn from(v: Option<V>) -> Self {
        match v {
            None => RemoteData::Absent,
            Some(v) => RemoteData::Cached(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_lattice() {
        let unknown: RemoteData<i64> = RemoteData::Unknown;
        assert_eq!(unknown.clone().or(RemoteData::Absent), RemoteData::Absent);
        assert_eq!(
            unknown.clone().or(RemoteData::Cached(1)),
            RemoteData::Cached(1)
        );
        assert_eq!(
            RemoteData::<i64>::Absent.or(RemoteData::Cached(1)),
            RemoteData::Absent
        );
        assert_eq!(
            RemoteData::Cached(2).or(RemoteData::Cached(1)),
            RemoteData::Cached(2)
        );
    }

    #[test]
    fn test_loaded() {
        assert!(!RemoteData::<()>::Unknown.loaded());
        assert!(RemoteData::<()>::Absent.loaded());
        assert!(RemoteData::Cached(()).loaded());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(RemoteData::from(Some(3)), RemoteData::Cached(3));
        assert_eq!(RemoteData::<i64>::from(None), RemoteData::Absent);
    }
}
