//! 消息存储与会话状态机基准测试
//! 测试入站去重、回显对账和重新同步合并的开销

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use unimarket_chat::model::{ConversationId, LocalIdGenerator, Message, MessageId, User};
use unimarket_chat::session::{ConversationSession, HistoryOutcome};
use unimarket_chat::store::{MessageRecord, MessageStore};
use unimarket_chat::transport::{NEW_MESSAGE_EVENT, TransportEvent};

fn message(id: i64, sender: &User, content: &str) -> Message {
    Message {
        id: MessageId(id),
        conversation_id: ConversationId(1),
        sender: sender.clone(),
        content: content.to_string(),
        timestamp: Utc::now(),
        is_read: false,
        is_edited: false,
    }
}

fn bench_store_append(c: &mut Criterion) {
    let seller = User::new(8, "Bob", "Seller");
    let mut group = c.benchmark_group("message_store_append");

    for size in [100usize, 1_000, 5_000] {
        let history: Vec<Message> = (0..size as i64)
            .map(|i| message(i, &seller, "still available?"))
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &history, |b, history| {
            b.iter(|| {
                let mut store = MessageStore::new();
                for m in history {
                    store.append(MessageRecord::from(m.clone()));
                }
                // 重复投递
                for m in history.iter().rev().take(50) {
                    black_box(store.append(MessageRecord::from(m.clone())));
                }
                black_box(store.len())
            })
        });
    }
    group.finish();
}

fn bench_echo_reconciliation(c: &mut Criterion) {
    let me = User::new(7, "Ada", "Lovelace");
    let seller = User::new(8, "Bob", "Seller");
    let mut ids = LocalIdGenerator::new();

    let mut base = MessageStore::new();
    for i in 0..1_000 {
        base.append(MessageRecord::from(message(i, &seller, "hi")));
    }
    let pendings: Vec<MessageRecord> = (0..20)
        .map(|i| MessageRecord::pending(ids.next_id(), ConversationId(1), me.clone(), format!("draft {i}")))
        .collect();

    let mut group = c.benchmark_group("echo_reconciliation");
    group.throughput(Throughput::Elements(pendings.len() as u64));
    group.bench_function("reconcile_pending_echoes", |b| {
        b.iter(|| {
            let mut store = base.clone();
            for pending in &pendings {
                store.append(pending.clone());
            }
            for (i, pending) in pendings.iter().enumerate() {
                let local_id = store
                    .find_pending_for_echo(&me, &pending.content)
                    .expect("pending record");
                let confirmed = message(10_000 + i as i64, &me, &pending.content);
                black_box(store.replace(&local_id, MessageRecord::from(confirmed)));
            }
            black_box(store.pending_count())
        })
    });
    group.finish();
}

fn bench_inbound_events(c: &mut Criterion) {
    let me = User::new(7, "Ada", "Lovelace");
    let seller = User::new(8, "Bob", "Seller");
    let events: Vec<TransportEvent> = (0..500)
        .map(|i| TransportEvent {
            topic: "conversation-1".to_string(),
            event: NEW_MESSAGE_EVENT.to_string(),
            payload: serde_json::to_value(message(i % 250, &seller, "ping")).expect("encode"),
        })
        .collect();

    let mut group = c.benchmark_group("inbound_events");
    group.throughput(Throughput::Elements(events.len() as u64));
    group.bench_function("handle_inbound_with_duplicates", |b| {
        b.iter(|| {
            let mut session = ConversationSession::new(me.clone());
            let plan = session
                .select_conversation(ConversationId(1))
                .expect("select plan");
            let outcome = session.history_loaded(plan.ticket, Ok(Vec::new()));
            assert!(matches!(outcome, HistoryOutcome::Ready { .. }));
            for event in &events {
                let _ = black_box(session.handle_inbound(event));
            }
            black_box(session.store().len())
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_store_append,
    bench_echo_reconciliation,
    bench_inbound_events
);
criterion_main!(benches);
