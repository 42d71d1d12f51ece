// src/pipeline/process.rs

//! Fetch, store, analyze and deliver posts for every enabled source.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::models::{Config, Post, ProcessingConfig, Source};
use crate::services::{
    Analyzer, Deliverer, PostScraper, PostSource, TelegramNotifier, build_analyzer,
};
use crate::storage::RetentionStore;
use crate::utils::log as runlog;
use crate::utils::message::format_message;

use super::lock::RunLock;

/// Counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub sources: usize,
    pub posts_fetched: usize,
    pub new_items: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    pub backfilled: usize,
    pub pending_delivered: usize,
    pub pruned: usize,
}

/// Drives one run over the store and its collaborators.
pub struct Processor<'a> {
    store: &'a RetentionStore,
    source: &'a mut dyn PostSource,
    analyzer: &'a dyn Analyzer,
    deliverer: &'a dyn Deliverer,
    config: &'a ProcessingConfig,
}

impl<'a> Processor<'a> {
    pub fn new(
        store: &'a RetentionStore,
        source: &'a mut dyn PostSource,
        analyzer: &'a dyn Analyzer,
        deliverer: &'a dyn Deliverer,
        config: &'a ProcessingConfig,
    ) -> Self {
        Self {
            store,
            source,
            analyzer,
            deliverer,
            config,
        }
    }

    /// Process every enabled source, then retry pending deliveries and prune.
    ///
    /// Only a failure to list sources aborts the run; per-source and per-item
    /// errors are logged and skipped.
    pub async fn run(&mut self) -> Result<RunStats> {
        let start_time = Utc::now();
        runlog::header("Post processing run");

        let sources = self.store.list_sources(true)?;
        log::info!("Found {} enabled sources to process", sources.len());

        let mut stats = RunStats::default();
        let pause = Duration::from_millis(self.config.source_pause_ms);

        for (index, source) in sources.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            self.process_source(source, &mut stats).await;
            stats.sources += 1;
        }

        if let Err(e) = self.backfill_analysis(&mut stats).await {
            log::error!("Error analyzing leftover items: {}", e);
        }

        if let Err(e) = self.deliver_pending(&mut stats).await {
            log::error!("Error processing pending posts: {}", e);
        }

        match self.store.run_maintenance() {
            Ok(pruned) => stats.pruned = pruned,
            Err(e) => log::error!("Database maintenance failed: {}", e),
        }

        let elapsed = Utc::now() - start_time;
        runlog::separator();
        runlog::summary(
            "Run complete",
            &[
                ("Sources", stats.sources.to_string()),
                ("Posts fetched", stats.posts_fetched.to_string()),
                ("New items", stats.new_items.to_string()),
                ("Delivered", stats.delivered.to_string()),
                ("Delivery failures", stats.delivery_failures.to_string()),
                ("Backfilled analyses", stats.backfilled.to_string()),
                ("Pending delivered", stats.pending_delivered.to_string()),
                ("Pruned", stats.pruned.to_string()),
                ("Elapsed", format!("{}s", elapsed.num_seconds())),
            ],
        );

        Ok(stats)
    }

    async fn process_source(&mut self, source: &Source, stats: &mut RunStats) {
        log::info!("Processing posts for @{}...", source.handle);

        let mut posts = self.source.fetch_posts(&source.handle).await;
        log::info!("Fetched {} posts for @{}", posts.len(), source.handle);
        stats.posts_fetched += posts.len();
        posts.truncate(self.config.max_items_per_source);

        for candidate in posts {
            let post = candidate.into_post();
            if let Err(e) = self.process_post(source, &post, stats).await {
                log::error!("Error processing post {}: {}", post.external_id, e);
            }
        }
    }

    async fn process_post(&self, source: &Source, post: &Post, stats: &mut RunStats) -> Result<()> {
        if !post.is_valid() {
            log::debug!("Skipping incomplete post {:?}", post.external_id);
            return Ok(());
        }
        if self.store.item_exists(&post.external_id)? {
            return Ok(());
        }

        log::info!("New post found: {}", post.url);
        if self.store.store_item(post, source.id)?.is_none() {
            return Ok(());
        }
        stats.new_items += 1;
        // The insert prunes, which evicts undelivered posts older than the
        // retention window, including possibly this one.
        let retained = self.store.item_exists(&post.external_id)?;
        let analysis = self.analyzer.analyze(&post.content).await;

        let delivered = if retained {
            self.store.update_analysis(&post.external_id, &analysis)?;
            self.deliver(&source.handle, post, &analysis).await?
        } else {
            log::debug!("Post {} is outside the retention window", post.external_id);
            let sent = self.send(&source.handle, post, &analysis).await;
            if sent {
                self.store.store_delivered(post, source.id, &analysis)?;
            }
            sent
        };

        if delivered {
            stats.delivered += 1;
        } else {
            stats.delivery_failures += 1;
        }
        Ok(())
    }

    /// Analyze items a previous run stored but never analyzed.
    async fn backfill_analysis(&self, stats: &mut RunStats) -> Result<()> {
        let items = self.store.unanalyzed(self.config.unanalyzed_limit)?;
        if items.is_empty() {
            return Ok(());
        }

        log::info!("Analyzing {} items left unanalyzed", items.len());
        for item in items {
            let analysis = self.analyzer.analyze(&item.post.content).await;
            match self.store.update_analysis(&item.post.external_id, &analysis) {
                Ok(_) => stats.backfilled += 1,
                Err(e) => log::error!(
                    "Failed to store analysis for {}: {}",
                    item.post.external_id,
                    e
                ),
            }
        }
        Ok(())
    }

    /// Retry delivery of analyzed items not yet confirmed delivered.
    async fn deliver_pending(&self, stats: &mut RunStats) -> Result<()> {
        log::info!("Checking for pending posts to send...");
        let pending = self.store.unsent_analyzed(self.config.pending_limit)?;
        log::info!("Found {} unsent analyzed posts", pending.len());
        if pending.is_empty() {
            return Ok(());
        }

        let handles: HashMap<i64, String> = self
            .store
            .list_sources(false)?
            .into_iter()
            .map(|source| (source.id, source.handle))
            .collect();

        for item in pending {
            let handle = handles
                .get(&item.source_id)
                .map(String::as_str)
                .unwrap_or("unknown");
            let analysis = item.analysis_result.as_deref().unwrap_or_default();

            log::info!("Sending pending post: {}", item.post.url);
            match self.deliver(handle, &item.post, analysis).await {
                Ok(true) => stats.pending_delivered += 1,
                Ok(false) => stats.delivery_failures += 1,
                Err(e) => log::error!(
                    "Error delivering pending post {}: {}",
                    item.post.external_id,
                    e
                ),
            }
        }
        Ok(())
    }

    /// Deliver one post and record success. Returns whether it was delivered.
    async fn deliver(&self, handle: &str, post: &Post, analysis: &str) -> Result<bool> {
        if !self.send(handle, post, analysis).await {
            return Ok(false);
        }
        self.store.mark_delivered(&post.external_id)?;
        Ok(true)
    }

    async fn send(&self, handle: &str, post: &Post, analysis: &str) -> bool {
        let message = format_message(handle, post, analysis);
        let report = self.deliverer.deliver(&message).await;

        if report.ok {
            log::info!("Post {} delivered", post.external_id);
        } else {
            log::error!(
                "Failed to deliver post {}: {}",
                post.external_id,
                report.error.as_deref().unwrap_or("Unknown error")
            );
        }
        report.ok
    }
}

/// Run the whole pipeline with the services described by `config`.
///
/// Holds the configured lock file for the duration of the run.
pub async fn run_pipeline(config: &Config) -> Result<RunStats> {
    let _lock = RunLock::acquire(&config.processing.lock_file)?;

    let store = RetentionStore::open(&config.database_path, config.processing.keep_count)?;
    let mut scraper = PostScraper::new(&config.scraper)?;
    let analyzer = build_analyzer(&config.analyzer)?;
    let notifier = TelegramNotifier::new(&config.telegram)?;

    let mut processor = Processor::new(
        &store,
        &mut scraper,
        analyzer.as_ref(),
        &notifier,
        &config.processing,
    );
    processor.run().await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::models::CandidatePost;
    use crate::services::DeliveryReport;

    #[derive(Default)]
    struct FakeSource {
        posts: HashMap<String, Vec<CandidatePost>>,
        calls: Vec<String>,
    }

    #[async_trait]
    impl PostSource for FakeSource {
        async fn fetch_posts(&mut self, handle: &str) -> Vec<CandidatePost> {
            self.calls.push(handle.to_string());
            self.posts.get(handle).cloned().unwrap_or_default()
        }
    }

    struct FakeAnalyzer;

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze(&self, text: &str) -> String {
            format!("analysis of {}", text)
        }
    }

    #[derive(Default)]
    struct FakeDeliverer {
        failing: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Deliverer for FakeDeliverer {
        async fn deliver(&self, message: &str) -> DeliveryReport {
            if self.failing.load(Ordering::SeqCst) {
                return DeliveryReport::failed("chat unavailable");
            }
            self.sent.lock().unwrap().push(message.to_string());
            DeliveryReport::delivered()
        }
    }

    fn candidate(id: u32) -> CandidatePost {
        CandidatePost {
            external_id: id.to_string(),
            url: format!("https://nitter.net/jack/status/{id}"),
            content: format!("post {id}"),
            published: format!("2024-01-01T00:{:02}:00Z", id),
            author: "Jack".into(),
            image_url: None,
        }
    }

    fn processing() -> ProcessingConfig {
        ProcessingConfig {
            source_pause_ms: 0,
            ..ProcessingConfig::default()
        }
    }

    async fn run_once(
        store: &RetentionStore,
        source: &mut FakeSource,
        deliverer: &FakeDeliverer,
        config: &ProcessingConfig,
    ) -> RunStats {
        Processor::new(store, source, &FakeAnalyzer, deliverer, config)
            .run()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_posts_are_stored_analyzed_and_delivered() {
        let store = RetentionStore::open_in_memory(10).unwrap();
        store.add_source("jack").unwrap();
        let mut source = FakeSource::default();
        source
            .posts
            .insert("jack".into(), vec![candidate(2), candidate(1)]);
        let deliverer = FakeDeliverer::default();

        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;

        assert_eq!(stats.sources, 1);
        assert_eq!(stats.new_items, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.delivery_failures, 0);

        let item = store.item("2").unwrap().unwrap();
        assert!(item.is_analyzed);
        assert!(item.is_delivered);
        assert_eq!(item.analysis_result.as_deref(), Some("analysis of post 2"));

        let sent = deliverer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("New tweet from @jack:"));
        assert!(sent[0].contains("analysis of post 2"));
    }

    #[tokio::test]
    async fn test_known_posts_are_not_reprocessed() {
        let store = RetentionStore::open_in_memory(10).unwrap();
        store.add_source("jack").unwrap();
        let mut source = FakeSource::default();
        source.posts.insert("jack".into(), vec![candidate(1)]);
        let deliverer = FakeDeliverer::default();

        run_once(&store, &mut source, &deliverer, &processing()).await;
        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;

        assert_eq!(stats.new_items, 0);
        assert_eq!(stats.delivered, 0);
        assert_eq!(deliverer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried_next_run() {
        let store = RetentionStore::open_in_memory(10).unwrap();
        store.add_source("jack").unwrap();
        let mut source = FakeSource::default();
        source.posts.insert("jack".into(), vec![candidate(1)]);
        let deliverer = FakeDeliverer::default();
        deliverer.failing.store(true, Ordering::SeqCst);

        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.delivery_failures, 2);
        assert!(!store.item("1").unwrap().unwrap().is_delivered);

        deliverer.failing.store(false, Ordering::SeqCst);
        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;

        assert_eq!(stats.new_items, 0);
        assert_eq!(stats.pending_delivered, 1);
        assert!(store.item("1").unwrap().unwrap().is_delivered);
        assert!(deliverer.sent.lock().unwrap()[0].contains("@jack"));
    }

    #[tokio::test]
    async fn test_posts_capped_per_source() {
        let store = RetentionStore::open_in_memory(10).unwrap();
        store.add_source("jack").unwrap();
        let mut source = FakeSource::default();
        source
            .posts
            .insert("jack".into(), (1..=5).rev().map(candidate).collect());
        let deliverer = FakeDeliverer::default();
        let config = ProcessingConfig {
            max_items_per_source: 2,
            ..processing()
        };

        let stats = run_once(&store, &mut source, &deliverer, &config).await;

        assert_eq!(stats.posts_fetched, 5);
        assert_eq!(stats.new_items, 2);
        assert!(store.item_exists("5").unwrap());
        assert!(store.item_exists("4").unwrap());
        assert!(!store.item_exists("3").unwrap());
    }

    #[tokio::test]
    async fn test_disabled_sources_are_skipped() {
        let store = RetentionStore::open_in_memory(10).unwrap();
        store.add_source("jack").unwrap();
        store.add_source("quiet").unwrap();
        store.set_enabled("quiet", false).unwrap();
        let mut source = FakeSource::default();
        let deliverer = FakeDeliverer::default();

        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;

        assert_eq!(stats.sources, 1);
        assert_eq!(source.calls, vec!["jack".to_string()]);
    }

    #[tokio::test]
    async fn test_leftover_unanalyzed_items_are_completed() {
        let store = RetentionStore::open_in_memory(10).unwrap();
        let jack = store.add_source("jack").unwrap().unwrap();
        store
            .store_item(&candidate(7).into_post(), jack.id)
            .unwrap()
            .unwrap();
        let mut source = FakeSource::default();
        let deliverer = FakeDeliverer::default();

        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;

        assert_eq!(stats.backfilled, 1);
        assert_eq!(stats.pending_delivered, 1);
        let item = store.item("7").unwrap().unwrap();
        assert_eq!(item.analysis_result.as_deref(), Some("analysis of post 7"));
        assert!(item.is_delivered);
    }

    #[tokio::test]
    async fn test_undelivered_posts_outside_retention_window_are_evicted() {
        let store = RetentionStore::open_in_memory(1).unwrap();
        store.add_source("jack").unwrap();
        let mut source = FakeSource::default();
        source
            .posts
            .insert("jack".into(), vec![candidate(1), candidate(2)]);
        let deliverer = FakeDeliverer::default();
        deliverer.failing.store(true, Ordering::SeqCst);

        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;

        // Post 2 is newer, so storing it evicts undelivered post 1.
        assert_eq!(stats.new_items, 2);
        assert!(!store.item_exists("1").unwrap());
        assert!(store.item_exists("2").unwrap());
    }

    #[tokio::test]
    async fn test_old_post_outside_retention_window_is_delivered_once() {
        let store = RetentionStore::open_in_memory(3).unwrap();
        store.add_source("jack").unwrap();
        let mut source = FakeSource::default();
        source.posts.insert(
            "jack".into(),
            vec![candidate(12), candidate(11), candidate(10)],
        );
        let deliverer = FakeDeliverer::default();
        run_once(&store, &mut source, &deliverer, &processing()).await;
        assert_eq!(deliverer.sent.lock().unwrap().len(), 3);

        // An older post shows up once the window is full of newer ones.
        source.posts.insert("jack".into(), vec![candidate(1)]);
        deliverer.failing.store(true, Ordering::SeqCst);
        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;
        assert_eq!(stats.new_items, 1);
        assert_eq!(stats.delivery_failures, 1);
        assert!(!store.item_exists("1").unwrap());

        deliverer.failing.store(false, Ordering::SeqCst);
        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;
        assert_eq!(stats.new_items, 1);
        assert_eq!(stats.delivered, 1);
        let item = store.item("1").unwrap().unwrap();
        assert!(item.is_delivered);
        assert_eq!(item.analysis_result.as_deref(), Some("analysis of post 1"));

        let stats = run_once(&store, &mut source, &deliverer, &processing()).await;
        assert_eq!(stats.new_items, 0);
        assert_eq!(stats.delivered, 0);
        let sent = deliverer.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(sent[3].contains("post 1"));
    }
}
