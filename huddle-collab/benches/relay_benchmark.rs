use criterion::{black_box, criterion_group, criterion_main, Criterion};
use huddle_collab::document::{DocOp, Document};
use huddle_collab::protocol::{MemberInfo, RelayMessage};
use huddle_collab::voice::VoiceRoster;
use uuid::Uuid;

fn bench_code_change_encode(c: &mut Criterion) {
    let sender = Uuid::new_v4();
    let code = "fn main() { println!(\"hello\"); }".repeat(4);

    c.bench_function("code_change_encode_128B", |b| {
        b.iter(|| {
            let msg = RelayMessage::code_change(black_box(sender), black_box("r1"), black_box(code.clone()));
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let sender = Uuid::new_v4();
    let msg = RelayMessage::code_change(sender, "r1", "x = 1\n".repeat(16));
    let encoded = msg.encode().unwrap();

    c.bench_function("frame_decode", |b| {
        b.iter(|| {
            black_box(RelayMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_doc_op_roundtrip(c: &mut Criterion) {
    c.bench_function("doc_op_roundtrip", |b| {
        b.iter(|| {
            let op = DocOp::Insert {
                pos: black_box(42),
                text: "typed a sentence".into(),
            };
            let encoded = op.encode().unwrap();
            black_box(DocOp::decode(&encoded).unwrap());
        })
    });
}

fn bench_document_apply_1k_ops(c: &mut Criterion) {
    c.bench_function("document_apply_1k_inserts", |b| {
        b.iter(|| {
            let mut doc = Document::new();
            for i in 0..1000 {
                doc.apply(DocOp::Insert {
                    pos: i,
                    text: "a".into(),
                });
            }
            black_box(doc.snapshot());
        })
    });
}

fn bench_document_replay_1k_ops(c: &mut Criterion) {
    let mut doc = Document::new();
    for i in 0..1000 {
        doc.apply(DocOp::Insert {
            pos: i,
            text: "a".into(),
        });
    }
    let ops = doc.ops().to_vec();

    c.bench_function("document_replay_1k_inserts", |b| {
        b.iter(|| {
            black_box(Document::replay(black_box(ops.clone())));
        })
    });
}

fn bench_joined_snapshot_encode(c: &mut Criterion) {
    let members: Vec<MemberInfo> = (0..50)
        .map(|i| MemberInfo::new(Uuid::new_v4(), format!("user-{i}")))
        .collect();
    let sender = members[0].client_id;

    c.bench_function("joined_snapshot_encode_50_members", |b| {
        b.iter(|| {
            let msg = RelayMessage::joined(
                black_box(sender),
                black_box("r1"),
                black_box(members.clone()),
                "user-0",
            );
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_voice_roster_others(c: &mut Criterion) {
    let mut roster = VoiceRoster::new();
    let ids: Vec<Uuid> = (0..100).map(|_| Uuid::new_v4()).collect();
    for (i, id) in ids.iter().enumerate() {
        roster.join(*id, format!("user-{i}"));
    }

    c.bench_function("voice_roster_others_100", |b| {
        b.iter(|| {
            black_box(roster.others(black_box(ids[50])));
        })
    });
}

criterion_group!(
    benches,
    bench_code_change_encode,
    bench_frame_decode,
    bench_doc_op_roundtrip,
    bench_document_apply_1k_ops,
    bench_document_replay_1k_ops,
    bench_joined_snapshot_encode,
    bench_voice_roster_others,
);
criterion_main!(benches);
