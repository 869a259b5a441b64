use augur_core::{compute_prompt_hash, AugurConfig, CallType, GenerationResponse};
use augur_llm::ResponseCache;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn bench_prompt_hash(c: &mut Criterion) {
    let prompt = "Allocate   the FOOD stores to the farmers before the first frost arrives";
    c.bench_function("cache/prompt_hash", |b| {
        b.iter(|| black_box(compute_prompt_hash(black_box(prompt))));
    });
}

fn bench_lookup_hit(c: &mut Criterion) {
    let cache = ResponseCache::from_config(&AugurConfig::default());
    let response = GenerationResponse::success("The granary is opened.", 12, 6, 0.0001, 240);
    let hashes: Vec<String> = (0..256)
        .map(|i| compute_prompt_hash(&format!("allocate food to farmer {}", i)))
        .collect();
    for hash in &hashes {
        cache.insert(hash, CallType::Narrative, &response);
    }

    c.bench_function("cache/lookup_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let hash = &hashes[i % hashes.len()];
            i += 1;
            black_box(cache.lookup(black_box(hash), CallType::Narrative));
        });
    });
}

fn bench_insert_with_eviction(c: &mut Criterion) {
    let mut config = AugurConfig::default();
    config.cache.capacity = 64;
    let cache = ResponseCache::from_config(&config);
    let response = GenerationResponse::success("Fine weather for it.", 8, 4, 0.0, 90);

    c.bench_function("cache/insert_evicting", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let hash = compute_prompt_hash(&format!("chatter {}", i));
            i += 1;
            black_box(cache.insert(&hash, CallType::Conversation, &response));
        });
    });
}

criterion_group!(benches, bench_prompt_hash, bench_lookup_hit, bench_insert_with_eviction);
criterion_main!(benches);
