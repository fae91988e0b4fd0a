//! 业务逻辑服务模块
//!
//! 封装问财查询、数据转换、同步任务和调度

pub mod fields;     // 字段提取
pub mod jobs;       // 同步任务
pub mod projection; // 记录到实体的转换
pub mod scheduler;  // 定时调度
pub mod wencai;     // 问财查询客户端
