//! 当前用户访问器
//!
//! 认证/会话管理不在本 crate 内，由宿主注入 `UserContext` 实现。

use parking_lot::RwLock;

/// 提供当前已认证用户 ID
pub trait UserContext: Send + Sync {
    /// 未登录时返回 None，此时远端推送会被跳过
    fn current_user_id(&self) -> Option<String>;
}

/// 内存中的用户上下文，登录/登出时由宿主更新
#[derive(Debug, Default)]
pub struct StaticUserContext {
    user_id: RwLock<Option<String>>,
}

impl StaticUserContext {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: RwLock::new(user_id),
        }
    }

    pub fn signed_in<S: Into<String>>(user_id: S) -> Self {
        Self::new(Some(user_id.into()))
    }

    pub fn set_user(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }
}

impl UserContext for StaticUserContext {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_user() {
        let ctx = StaticUserContext::default();
        assert_eq!(ctx.current_user_id(), None);

        ctx.set_user(Some("u1".into()));
        assert_eq!(ctx.current_user_id().as_deref(), Some("u1"));

        ctx.set_user(None);
        assert!(ctx.current_user_id().is_none());
    }
}
