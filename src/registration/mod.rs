/// Registration 模块
///
/// 每个账户对应一个 `RegistrationSession` 状态机，负责：
///
/// - 构造 REGISTER / 注销请求（过期时间取自账户配置）
/// - 串行化同一账户的注册尝试，避免并发重复请求
/// - 把传输层回报的结果收敛为对外可见的状态变化
/// - 注册成功后触发一次性的留言指示 (MWI) 订阅
///
/// 状态机本身是纯同步代码，不持锁、不做 IO，由端点层驱动
pub mod session;

pub use session::{RegistrationSession, RegistrationState, RegistrationUpdate, MWI_INTERVAL};
