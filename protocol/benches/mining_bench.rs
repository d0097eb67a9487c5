// Mining and validation benchmarks for swell.
//
// Covers sealing a block at increasing difficulty, block hashing, and full
// chain verification at a few ledger lengths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use swell_protocol::network::{decode_snapshot, encode_ledger};
use swell_protocol::storage::{verify_chain, Block, Ledger, Payload};

const TS: i64 = 1_700_000_000;

/// A ledger snapshot holding `n` blocks, genesis included, mined at difficulty 1.
fn chain_of(n: usize) -> Vec<Block> {
    let ledger = Ledger::with_genesis(Block::genesis(TS), 1);
    for i in 1..n {
        ledger.append(Payload::new("Pier7", i as i64)).unwrap();
    }
    ledger.snapshot()
}

fn bench_block_hash(c: &mut Criterion) {
    let genesis = Block::genesis(TS);
    let block = Block::next(&genesis, Payload::new("Pier7", 3), TS + 1);

    c.bench_function("block/compute_hash", |b| {
        b.iter(|| block.compute_hash());
    });
}

fn bench_mining(c: &mut Criterion) {
    let mut group = c.benchmark_group("block/mine");
    let genesis = Block::genesis(TS);

    for difficulty in [1usize, 2, 3] {
        group.bench_with_input(
            BenchmarkId::from_parameter(difficulty),
            &difficulty,
            |b, &d| {
                let mut ts = TS;
                b.iter_with_setup(
                    || {
                        // Fresh timestamp per round so every run does real work.
                        ts += 1;
                        Block::next(&genesis, Payload::new("Pier7", 3), ts)
                    },
                    |mut block| {
                        block.mine(d);
                        block
                    },
                );
            },
        );
    }

    group.finish();
}

fn bench_verify_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/verify_chain");

    for length in [10usize, 100, 1_000] {
        let chain = chain_of(length);
        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::from_parameter(length), &chain, |b, chain| {
            b.iter(|| verify_chain(chain).unwrap());
        });
    }

    group.finish();
}

fn bench_snapshot_codec(c: &mut Criterion) {
    let chain = chain_of(100);
    let line = encode_ledger(&chain).unwrap();

    c.bench_function("gossip/encode_100", |b| {
        b.iter(|| encode_ledger(&chain).unwrap());
    });
    c.bench_function("gossip/decode_100", |b| {
        b.iter(|| decode_snapshot(&line).unwrap());
    });
}

criterion_group!(
    benches,
    bench_block_hash,
    bench_mining,
    bench_verify_chain,
    bench_snapshot_codec,
);
criterion_main!(benches);
