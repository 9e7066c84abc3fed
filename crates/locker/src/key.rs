//! 锁 key 生成

use std::fmt;

/// 调用方提供的资源标识
///
/// 可以是字符串或整数，最终都以文本形式拼进锁 key。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockId(String);

impl LockId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LockId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for LockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&String> for LockId {
    fn from(id: &String) -> Self {
        Self(id.clone())
    }
}

macro_rules! impl_integer_lock_id {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for LockId {
                fn from(id: $ty) -> Self {
                    Self(id.to_string())
                }
            }
        )*
    };
}

impl_integer_lock_id!(i32, i64, u32, u64, usize);

/// 锁 key：`<session_name>/<id>/lock`
pub fn lock_key(session_name: &str, id: &LockId) -> String {
    format!("{}/{}/lock", session_name, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_format() {
        assert_eq!(
            lock_key("myServiceWriter", &LockId::from(123)),
            "myServiceWriter/123/lock"
        );
        assert_eq!(
            lock_key("cardWrites", &LockId::from("card-9")),
            "cardWrites/card-9/lock"
        );
    }

    #[test]
    fn test_integer_and_string_ids_match() {
        assert_eq!(LockId::from(456u64), LockId::from("456"));
        assert_eq!(LockId::from(-1i64).as_str(), "-1");
    }
}
