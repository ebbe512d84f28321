//! # Prometheus 指标收集模块
//!
//! 聊天会话与实时通道的运行指标。

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 聊天客户端指标
#[derive(Clone)]
pub struct ChatMetrics {
    /// 成功发送（服务端确认）的消息数
    pub messages_sent_total: IntCounter,
    /// 发送失败并回滚的消息数
    pub send_failures_total: IntCounter,
    /// 入站事件，按处理结果分类（appended / reconciled / duplicate / ignored）
    pub inbound_events_total: IntCounterVec,
    /// 被丢弃的过期响应数
    pub stale_responses_total: IntCounter,
    /// 重连次数
    pub reconnects_total: IntCounter,
    /// 信箱已满被丢弃的事件数
    pub mailbox_dropped_total: IntCounter,
    /// 当前待确认消息数
    pub pending_messages: IntGauge,
    /// 历史消息加载耗时（秒）
    pub history_fetch_duration_seconds: Histogram,
}

impl ChatMetrics {
    /// 创建指标并注册到给定注册表
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_sent_total =
            IntCounter::new("chat_messages_sent_total", "Messages confirmed by the server")?;
        let send_failures_total =
            IntCounter::new("chat_send_failures_total", "Messages rolled back after a failed send")?;
        let inbound_events_total = IntCounterVec::new(
            Opts::new("chat_inbound_events_total", "Inbound realtime events by outcome"),
            &["outcome"],
        )?;
        let stale_responses_total = IntCounter::new(
            "chat_stale_responses_total",
            "Responses discarded because the conversation changed",
        )?;
        let reconnects_total =
            IntCounter::new("chat_reconnects_total", "Realtime connection re-establishments")?;
        let mailbox_dropped_total = IntCounter::new(
            "chat_mailbox_dropped_total",
            "Realtime events dropped because the session mailbox was full",
        )?;
        let pending_messages =
            IntGauge::new("chat_pending_messages", "Optimistic messages awaiting confirmation")?;
        let history_fetch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "chat_history_fetch_duration_seconds",
                "History page fetch duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(messages_sent_total.clone()))?;
        registry.register(Box::new(send_failures_total.clone()))?;
        registry.register(Box::new(inbound_events_total.clone()))?;
        registry.register(Box::new(stale_responses_total.clone()))?;
        registry.register(Box::new(reconnects_total.clone()))?;
        registry.register(Box::new(mailbox_dropped_total.clone()))?;
        registry.register(Box::new(pending_messages.clone()))?;
        registry.register(Box::new(history_fetch_duration_seconds.clone()))?;

        Ok(Self {
            messages_sent_total,
            send_failures_total,
            inbound_events_total,
            stale_responses_total,
            reconnects_total,
            mailbox_dropped_total,
            pending_messages,
            history_fetch_duration_seconds,
        })
    }

    /// 未注册的指标实例（测试与未启用指标的调用方使用）
    pub fn unregistered() -> Self {
        let registry = Registry::new();
        match Self::new(&registry) {
            Ok(metrics) => metrics,
            // 全新注册表上不会发生重复注册
            Err(err) => unreachable!("metric registration on an empty registry failed: {err}"),
        }
    }

    pub fn record_inbound(&self, outcome: &str) {
        self.inbound_events_total.with_label_values(&[outcome]).inc();
    }
}

impl Default for ChatMetrics {
    fn default() -> Self {
        Self::unregistered()
    }
}

/// 以文本格式导出注册表中的指标
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
