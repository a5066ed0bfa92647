//! Plain-array sections backed either by owned memory or a file mapping

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, Range};
use std::sync::Arc;

use bytemuck::Pod;
use memmap2::Mmap;

/// A read-only array of plain values.
///
/// `Mapped` sections borrow from a shared mapping of the artifact; the byte
/// range is checked for alignment and length when the section is created.
pub enum Section<T: Pod> {
    Owned(Vec<T>),
    Mapped {
        map: Arc<Mmap>,
        range: Range<usize>,
        _marker: PhantomData<T>,
    },
}

impl<T: Pod> Section<T> {
    /// Wrap a byte range of a mapping. Returns `None` when the range is out
    /// of bounds, misaligned for `T`, or not a whole number of elements.
    pub fn mapped(map: Arc<Mmap>, range: Range<usize>) -> Option<Self> {
        let bytes = map.get(range.clone())?;
        bytemuck::try_cast_slice::<u8, T>(bytes).ok()?;
        Some(Section::Mapped {
            map,
            range,
            _marker: PhantomData,
        })
    }

    /// Copy a byte range into an owned, properly aligned vector
    pub fn copied(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % std::mem::size_of::<T>() != 0 {
            return None;
        }
        Some(Section::Owned(bytemuck::pod_collect_to_vec(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.deref())
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Section::Mapped { .. })
    }
}

impl<T: Pod> Deref for Section<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            Section::Owned(v) => v.as_slice(),
            Section::Mapped { map, range, .. } => bytemuck::cast_slice(&map[range.clone()]),
        }
    }
}

impl<T: Pod> From<Vec<T>> for Section<T> {
    fn from(v: Vec<T>) -> Self {
        Section::Owned(v)
    }
}

impl<T: Pod> Default for Section<T> {
    fn default() -> Self {
        Section::Owned(Vec::new())
    }
}

impl<T: Pod> Clone for Section<T> {
    fn clone(&self) -> Self {
        match self {
            Section::Owned(v) => Section::Owned(v.clone()),
            Section::Mapped { map, range, .. } => Section::Mapped {
                map: Arc::clone(map),
                range: range.clone(),
                _marker: PhantomData,
            },
        }
    }
}

impl<T: Pod> fmt::Debug for Section<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_mapped() { "mapped" } else { "owned" };
        write!(f, "Section<{}>({kind}, len={})", std::any::type_name::<T>(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copied_rejects_partial_elements() {
        assert!(Section::<u32>::copied(&[1, 0, 0]).is_none());
        let s = Section::<u32>::copied(&[1, 0, 0, 0, 2, 0, 0, 0]).unwrap();
        assert_eq!(&*s, &[1, 2]);
        assert!(!s.is_mapped());
    }

    #[test]
    fn test_owned_bytes_roundtrip() {
        let s: Section<u16> = vec![0x0102u16, 0x0304].into();
        let back = Section::<u16>::copied(s.as_bytes()).unwrap();
        assert_eq!(&*back, &*s);
    }
}
