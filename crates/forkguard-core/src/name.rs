use std::fmt;

use serde::{Serialize, Serializer};

/// Size of the command name buffer of a kernel task.
pub const TASK_COMM_LEN: usize = 16;

/// Process command name: at most [`TASK_COMM_LEN`] bytes with an explicit length.
///
/// Raw buffers coming from the kernel are NUL terminated, or fully used when
/// the name is exactly `TASK_COMM_LEN` long. Everything after the first NUL is
/// ignored, longer inputs are truncated.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessName {
    bytes: [u8; TASK_COMM_LEN],
    len: u8,
}

impl ProcessName {
    pub fn new(raw: &[u8]) -> Self {
        let len = raw
            .iter()
            .take(TASK_COMM_LEN)
            .position(|b| *b == 0)
            .unwrap_or(raw.len().min(TASK_COMM_LEN));
        let mut bytes = [0; TASK_COMM_LEN];
        bytes[..len].copy_from_slice(&raw[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero padded buffer, the layout used on the wire.
    pub fn to_comm(&self) -> [u8; TASK_COMM_LEN] {
        self.bytes
    }
}

/// Byte-wise, case-sensitive comparison of two process names.
pub fn same_name(subject: &ProcessName, ancestor: &ProcessName) -> bool {
    subject.as_bytes() == ancestor.as_bytes()
}

impl From<&str> for ProcessName {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl Serialize for ProcessName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_match() {
        let name = ProcessName::from("bash");
        assert!(same_name(&name, &name));
        assert!(same_name(&ProcessName::from(""), &ProcessName::from("")));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert!(!same_name(
            &ProcessName::from("Proc"),
            &ProcessName::from("proc")
        ));
    }

    #[test]
    fn prefix_is_not_a_match() {
        assert!(!same_name(
            &ProcessName::from("sh"),
            &ProcessName::from("sshd")
        ));
    }

    #[test]
    fn stops_at_first_terminator() {
        let name = ProcessName::new(b"fbomb\0garbage\0\0\0");
        assert_eq!(name.as_bytes(), b"fbomb");
        assert!(same_name(&name, &ProcessName::from("fbomb")));
        assert_eq!(&name.to_comm()[..6], b"fbomb\0");
    }

    #[test]
    fn long_names_are_truncated() {
        let name = ProcessName::from("a-very-long-process-name");
        assert_eq!(name.len(), TASK_COMM_LEN);
        assert_eq!(name.as_bytes(), b"a-very-long-proc");
        assert!(same_name(&name, &ProcessName::from("a-very-long-process")));
    }

    #[test]
    fn terminator_after_the_limit_is_ignored() {
        let mut raw = [b'x'; 20];
        raw[18] = 0;
        assert_eq!(ProcessName::new(&raw).len(), TASK_COMM_LEN);
    }
}
