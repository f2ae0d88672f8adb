use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use regional_news::feed::parser::FeedParser;
use regional_news::feed::ArticleRecord;
use regional_news::storage::region::{merge_articles, MergeMode, MergePolicy};
use regional_news::storage::{CacheConfig, CacheStore};
use std::io::Cursor;

fn create_articles(prefix: &str, start: usize, count: usize) -> Vec<ArticleRecord> {
    let now = Utc::now();
    (start..start + count)
        .map(|n| ArticleRecord {
            id: format!("https://news.err.ee/{}/{}", prefix, n),
            title: format!("Story {}", n),
            body: "Lorem ipsum dolor sit amet. ".repeat(20),
            summary: String::new(),
            published_at: (n % 17 != 0).then(|| now - Duration::minutes(n as i64)),
            image_url: None,
            category: "General".to_string(),
            source: "ERR".to_string(),
            region: "Estonia".to_string(),
            language: "en".to_string(),
            cached_at: now,
            translated_title: None,
            translated_body: None,
        })
        .collect()
}

fn create_large_feed(count: usize) -> String {
    let items: String = (0..count)
        .map(|n| {
            format!(
                "<item><title>Story {n}</title><link>https://news.err.ee/{n}</link>\
                 <description><![CDATA[<p>Paragraph <b>{n}</b></p>]]></description>\
                 <pubDate>Fri, 15 Mar 2024 10:00:00 GMT</pubDate></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>ERR</title><link>https://news.err.ee</link>{items}</channel></rss>"#)
}

fn bench_merge(c: &mut Criterion) {
    let policy = MergePolicy::default();
    let now = Utc::now();
    let mut group = c.benchmark_group("region_merge");

    for &count in &[100usize, 1000, 5000] {
        let existing = {
            let (merged, _) = merge_articles(&[], create_articles("a", 0, count), &policy, MergeMode::Auto, now);
            merged
        };

        // 5% new items: stays under the reset threshold.
        let incremental = create_articles("a", count / 20, count);
        group.bench_with_input(BenchmarkId::new("incremental", count), &incremental, |b, incoming| {
            b.iter(|| black_box(merge_articles(&existing, incoming.clone(), &policy, MergeMode::Auto, now)))
        });

        let reset = create_articles("b", 0, count / 2);
        group.bench_with_input(BenchmarkId::new("reset", count), &reset, |b, incoming| {
            b.iter(|| black_box(merge_articles(&existing, incoming.clone(), &policy, MergeMode::Auto, now)))
        });
    }

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let store = CacheStore::new(CacheConfig::default());
    for region in ["Estonia", "Latvia", "Lithuania", "Finland"] {
        store.update_cache(region, create_articles(region, 0, 500));
    }

    let mut group = c.benchmark_group("cache_queries");
    group.bench_function("get_all", |b| b.iter(|| black_box(store.get_all())));
    group.bench_function("get_by_category", |b| b.iter(|| black_box(store.get_by_category("gen"))));
    group.bench_function("daily_digest", |b| b.iter(|| black_box(store.get_daily_digest(5))));
    group.bench_function("stats", |b| b.iter(|| black_box(store.stats())));
    group.finish();
}

fn bench_parse_feeds(c: &mut Criterion) {
    let parser = FeedParser::new();
    let mut group = c.benchmark_group("feed_parsing");
    group.sample_size(20);

    for &count in &[10usize, 100, 1000] {
        let feed = create_large_feed(count);
        group.bench_with_input(BenchmarkId::new("parse_items", count), &feed, |b, content| {
            b.iter(|| black_box(parser.parse_feed(Cursor::new(content.as_bytes()))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge, bench_queries, bench_parse_feeds);
criterion_main!(benches);
