#[cfg(test)]
mod tests {
    use crate::buffer::ChunkBuffer;
    use crate::device::{DeviceLog, RecordingSpeaker};
    use crate::error::StreamError;
    use crate::observer::SessionObserver;
    use crate::playback::PlaybackWorker;
    use crate::types::{Chunk, PlaybackState};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Started,
        Chunk(u64),
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionObserver for RecordingObserver {
        fn on_playback_started(&self) {
            self.events.lock().unwrap().push(Event::Started);
        }

        fn on_playback_chunk(&self, sequence_number: u64) {
            self.events.lock().unwrap().push(Event::Chunk(sequence_number));
        }
    }

    fn chunk(seq: u64) -> Chunk {
        Chunk::new(seq, vec![seq as u8; 4])
    }

    async fn wait_until(log: &Arc<Mutex<DeviceLog>>, condition: impl Fn(&DeviceLog) -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition(&log.lock().unwrap()) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    proptest! {
        #[test]
        fn prop_fifo_for_any_timing(
            count in 0u64..60,
            capacity in 1usize..8,
            producer_yields in prop::collection::vec(any::<bool>(), 60),
            consumer_yields in prop::collection::vec(any::<bool>(), 60),
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            let received = runtime.block_on(async move {
                let (producer, mut consumer) =
                    ChunkBuffer::bounded(capacity, CancellationToken::new()).unwrap();

                let feeder = tokio::spawn(async move {
                    for seq in 0..count {
                        if producer_yields[seq as usize] {
                            tokio::task::yield_now().await;
                        }
                        producer.push(chunk(seq)).await.unwrap();
                    }
                    producer.close();
                });

                let mut received = Vec::new();
                while let Some(c) = consumer.pop().await {
                    if consumer_yields[c.sequence_number as usize] {
                        tokio::task::yield_now().await;
                    }
                    received.push(c.sequence_number);
                }
                feeder.await.unwrap();
                received
            });

            prop_assert_eq!(received, (0..count).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = ChunkBuffer::bounded(0, CancellationToken::new());
        assert!(matches!(result, Err(StreamError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_producer_blocks_only_while_full() {
        let (producer, mut consumer) = ChunkBuffer::bounded(2, CancellationToken::new()).unwrap();

        producer.push(chunk(0)).await.unwrap();
        producer.push(chunk(1)).await.unwrap();
        assert_eq!(producer.len(), 2);
        assert_eq!(consumer.capacity(), 2);

        let blocked = timeout(Duration::from_millis(50), producer.push(chunk(2))).await;
        assert!(blocked.is_err(), "push should wait while the buffer is full");

        assert_eq!(consumer.pop().await.unwrap().sequence_number, 0);
        timeout(Duration::from_secs(1), producer.push(chunk(2)))
            .await
            .expect("push should proceed once space frees up")
            .unwrap();

        assert_eq!(consumer.pop().await.unwrap().sequence_number, 1);
        assert_eq!(consumer.pop().await.unwrap().sequence_number, 2);
        assert!(consumer.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (producer, mut consumer) = ChunkBuffer::bounded(8, CancellationToken::new()).unwrap();
        for seq in 0..3 {
            producer.push(chunk(seq)).await.unwrap();
        }
        producer.close();

        let mut drained = Vec::new();
        while let Some(c) = consumer.pop().await {
            drained.push(c.sequence_number);
        }
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(consumer.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_wakes_consumer_on_empty_buffer() {
        let cancel = CancellationToken::new();
        let (producer, mut consumer) = ChunkBuffer::bounded(4, cancel.clone()).unwrap();

        let waiter = tokio::spawn(async move { consumer.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let popped = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer must not hang after cancel")
            .unwrap();
        assert!(popped.is_none());
        drop(producer);
    }

    #[tokio::test]
    async fn test_cancel_skips_queued_chunks() {
        let cancel = CancellationToken::new();
        let (producer, mut consumer) = ChunkBuffer::bounded(4, cancel.clone()).unwrap();
        producer.push(chunk(0)).await.unwrap();

        cancel.cancel();
        assert!(consumer.pop().await.is_none());
        assert!(consumer.is_cancelled());
    }

    #[tokio::test]
    async fn test_push_after_consumer_dropped() {
        let (producer, consumer) = ChunkBuffer::bounded(4, CancellationToken::new()).unwrap();
        drop(consumer);
        assert!(matches!(
            producer.push(chunk(0)).await,
            Err(StreamError::BufferClosed)
        ));
    }

    #[tokio::test]
    async fn test_playback_starts_exactly_at_warmup_threshold() {
        let (producer, consumer) = ChunkBuffer::bounded(16, CancellationToken::new()).unwrap();
        let speaker = RecordingSpeaker::new();
        let log = speaker.log();
        let observer = Arc::new(RecordingObserver::default());
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);

        let worker = PlaybackWorker::new(consumer, Box::new(speaker), 7, observer.clone(), state_tx);
        let task = tokio::spawn(worker.run());

        for seq in 0..6 {
            producer.push(chunk(seq)).await.unwrap();
        }
        wait_until(&log, |l| l.written.len() == 6).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lock().unwrap().play_calls, 0);
        assert_eq!(*state_rx.borrow(), PlaybackState::WarmingUp);
        assert!(observer.events().is_empty());

        producer.push(chunk(6)).await.unwrap();
        wait_until(&log, |l| l.play_calls == 1).await;
        assert_eq!(log.lock().unwrap().writes_before_play, Some(7));
        assert_eq!(*state_rx.borrow(), PlaybackState::Playing);

        producer.push(chunk(7)).await.unwrap();
        producer.close();
        let stats = task.await.unwrap().unwrap();

        assert!(stats.started);
        assert_eq!(stats.chunks_played, 8);
        assert_eq!(stats.bytes_played, 32);
        assert_eq!(*state_rx.borrow(), PlaybackState::Stopped);

        let log = log.lock().unwrap();
        assert_eq!(log.play_calls, 1);
        assert!(log.released);

        let mut expected = vec![Event::Started];
        expected.extend((0..8).map(Event::Chunk));
        assert_eq!(observer.events(), expected);
    }

    #[tokio::test]
    async fn test_short_stream_is_flushed() {
        let (producer, consumer) = ChunkBuffer::bounded(16, CancellationToken::new()).unwrap();
        let speaker = RecordingSpeaker::new();
        let log = speaker.log();
        let (state_tx, _state_rx) = watch::channel(PlaybackState::Idle);
        let worker = PlaybackWorker::new(
            consumer,
            Box::new(speaker),
            7,
            Arc::new(RecordingObserver::default()),
            state_tx,
        );

        for seq in 0..3 {
            producer.push(chunk(seq)).await.unwrap();
        }
        producer.close();
        let stats = worker.run().await.unwrap();

        assert!(stats.started);
        assert_eq!(stats.chunks_played, 3);
        let log = log.lock().unwrap();
        assert_eq!(log.play_calls, 1);
        assert_eq!(log.writes_before_play, Some(3));
    }

    #[tokio::test]
    async fn test_cancelled_worker_stops_without_playing() {
        let cancel = CancellationToken::new();
        let (producer, consumer) = ChunkBuffer::bounded(16, cancel.clone()).unwrap();
        let speaker = RecordingSpeaker::new();
        let log = speaker.log();
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let worker = PlaybackWorker::new(
            consumer,
            Box::new(speaker),
            7,
            Arc::new(RecordingObserver::default()),
            state_tx,
        );
        let task = tokio::spawn(worker.run());

        producer.push(chunk(0)).await.unwrap();
        wait_until(&log, |l| l.written.len() == 1).await;
        cancel.cancel();

        let stats = timeout(Duration::from_secs(1), task)
            .await
            .expect("worker must stop on cancel")
            .unwrap()
            .unwrap();
        assert!(!stats.started);
        assert_eq!(*state_rx.borrow(), PlaybackState::Stopped);

        let log = log.lock().unwrap();
        assert_eq!(log.play_calls, 0);
        assert!(log.released);
    }
}
