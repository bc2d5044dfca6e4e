//! Bounded cache of decoded songs
//!
//! Songs are decoded all-or-nothing: every track is decoded in parallel and
//! the song is only published once all of them succeed. The cache keeps at
//! most `capacity` songs, evicting the oldest insertion first, but never
//! the song currently playing.

use crate::buffer::{DecodedTrack, SongBuffers};
use crate::decoder::{AudioDecoder, DecodeError};
use crate::error::EngineError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use stem_library::{SongId, Track, TrackStore};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<SongId, Arc<SongBuffers>>,
    /// Insertion order, oldest first
    order: VecDeque<SongId>,
    active: Option<SongId>,
    in_flight: HashSet<SongId>,
    /// Bumped by `clear`; decodes started under an older generation are dropped
    generation: u64,
}

/// Decoded-song cache shared by the engine and preload threads
pub struct DecodeCache {
    store: Arc<dyn TrackStore>,
    decoder: Arc<dyn AudioDecoder>,
    capacity: usize,
    state: Mutex<CacheState>,
    decoded: Condvar,
}

impl DecodeCache {
    /// Create a cache holding up to `capacity` songs (at least one)
    pub fn new(
        store: Arc<dyn TrackStore>,
        decoder: Arc<dyn AudioDecoder>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            decoder,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            decoded: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has(&self, song_id: SongId) -> bool {
        self.state.lock().entries.contains_key(&song_id)
    }

    pub fn get(&self, song_id: SongId) -> Option<Arc<SongBuffers>> {
        self.state.lock().entries.get(&song_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Cached songs, oldest first
    pub fn song_ids(&self) -> Vec<SongId> {
        self.state.lock().order.iter().copied().collect()
    }

    pub fn active(&self) -> Option<SongId> {
        self.state.lock().active
    }

    /// Mark the song the engine is playing; it is exempt from eviction
    pub fn set_active(&self, song_id: Option<SongId>) {
        self.state.lock().active = song_id;
    }

    /// Return the cached song, decoding and inserting it if absent
    ///
    /// If another thread is already decoding the same song this waits for it
    /// and reuses its result. Nothing is inserted unless every track decodes.
    /// The new entry gets no eviction exemption: with the cache full of the
    /// active song it is dropped again straight away.
    pub fn decode_and_store(
        &self,
        song_id: SongId,
        tracks: &[Track],
    ) -> Result<Arc<SongBuffers>, EngineError> {
        self.fetch(song_id, tracks, false)
    }

    /// Like [`decode_and_store`](Self::decode_and_store), but also makes the
    /// song active under the same lock that publishes it
    ///
    /// The previous active song loses its exemption at that point. On failure
    /// the active song is left unchanged.
    pub fn load(&self, song_id: SongId, tracks: &[Track]) -> Result<Arc<SongBuffers>, EngineError> {
        self.fetch(song_id, tracks, true)
    }

    /// Evict oldest-first, skipping the active song, until within capacity
    ///
    /// Returns the evicted songs, oldest first.
    pub fn evict_if_over_capacity(&self) -> Vec<SongId> {
        let mut state = self.state.lock();
        self.evict(&mut state)
    }

    /// Drop one song. Refuses (returning false) if it is the active song.
    pub fn remove(&self, song_id: SongId) -> bool {
        let mut state = self.state.lock();
        if state.active == Some(song_id) {
            tracing::warn!(song_id, "eviction conflict: song is playing");
            return false;
        }
        state.order.retain(|id| *id != song_id);
        state.entries.remove(&song_id).is_some()
    }

    /// Drop every song and forget the active one
    ///
    /// Decodes still running will not be inserted.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        state.active = None;
        state.generation += 1;
    }

    fn fetch(
        &self,
        song_id: SongId,
        tracks: &[Track],
        activate: bool,
    ) -> Result<Arc<SongBuffers>, EngineError> {
        let generation = {
            let mut state = self.state.lock();
            loop {
                if let Some(buffers) = state.entries.get(&song_id).cloned() {
                    tracing::debug!(song_id, "song already decoded");
                    if activate {
                        state.active = Some(song_id);
                        self.evict(&mut state);
                    }
                    return Ok(buffers);
                }
                if !state.in_flight.contains(&song_id) {
                    break;
                }
                tracing::debug!(song_id, "waiting for in-flight decode");
                self.decoded.wait(&mut state);
            }
            state.in_flight.insert(song_id);
            state.generation
        };

        tracing::info!(song_id, tracks = tracks.len(), "decoding song");
        let result = self.decode_tracks(song_id, tracks);

        let mut state = self.state.lock();
        state.in_flight.remove(&song_id);
        self.decoded.notify_all();

        let buffers = Arc::new(result?);
        if state.generation != generation {
            tracing::debug!(song_id, "cache cleared while decoding, result dropped");
            return Err(EngineError::Discarded(song_id));
        }

        state.entries.insert(song_id, Arc::clone(&buffers));
        state.order.retain(|id| *id != song_id);
        state.order.push_back(song_id);
        if activate {
            state.active = Some(song_id);
        }
        self.evict(&mut state);

        Ok(buffers)
    }

    /// Evict oldest-first until within capacity
    ///
    /// The active song is skipped; if nothing else is left the cache stays
    /// over capacity.
    fn evict(&self, state: &mut CacheState) -> Vec<SongId> {
        let mut evicted = Vec::new();
        let active = state.active;

        while state.entries.len() > self.capacity {
            let victim = state.order.iter().position(|id| Some(*id) != active);
            let Some(index) = victim else {
                break;
            };
            if let Some(id) = state.order.remove(index) {
                state.entries.remove(&id);
                tracing::info!(evicted = id, "evicted song from decode cache");
                evicted.push(id);
            }
        }

        evicted
    }

    /// Decode all tracks concurrently; first failure in track order wins
    fn decode_tracks(&self, song_id: SongId, tracks: &[Track]) -> Result<SongBuffers, EngineError> {
        let results: Vec<Result<DecodedTrack, EngineError>> = thread::scope(|scope| {
            let handles: Vec<_> = tracks
                .iter()
                .map(|track| (track, scope.spawn(move || self.decode_track(song_id, track))))
                .collect();

            handles
                .into_iter()
                .map(|(track, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(EngineError::Decode {
                            filename: track.key().to_string(),
                            source: DecodeError::Decode("decoder panicked".to_string()),
                        })
                    })
                })
                .collect()
        });

        let decoded = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(SongBuffers::new(song_id, decoded))
    }

    fn decode_track(&self, song_id: SongId, track: &Track) -> Result<DecodedTrack, EngineError> {
        let key = track.key();
        let bytes = self
            .store
            .track_bytes(song_id, key)?
            .ok_or_else(|| EngineError::TrackMissing {
                song_id,
                filename: key.to_string(),
            })?;

        let buffer = self
            .decoder
            .decode(&bytes, Some(key))
            .map_err(|source| EngineError::Decode {
                filename: key.to_string(),
                source,
            })?;

        tracing::debug!(
            song_id,
            track = key,
            seconds = buffer.duration(),
            sample_rate = buffer.sample_rate(),
            "decoded track"
        );

        Ok(DecodedTrack {
            key: key.to_string(),
            buffer: Arc::new(buffer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{corrupt, track, tracks, GatedDecoder, MemoryStore, ToneDecoder};

    fn cache_with(store: MemoryStore, capacity: usize) -> (DecodeCache, Arc<ToneDecoder>) {
        let decoder = Arc::new(ToneDecoder::new());
        let cache = DecodeCache::new(Arc::new(store), decoder.clone(), capacity);
        (cache, decoder)
    }

    #[test]
    fn test_decode_and_store_inserts_song() {
        let store = MemoryStore::new();
        let song = store.insert_song(1, &["drums", "bass", "vox"], 0.5);
        let (cache, decoder) = cache_with(store, 4);

        let buffers = cache.decode_and_store(1, &song).unwrap();
        assert_eq!(buffers.len(), 3);
        assert!(cache.has(1));
        assert_eq!(decoder.decodes(), 3);
        assert!((buffers.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cached_song_not_redecoded() {
        let store = MemoryStore::new();
        let song = store.insert_song(1, &["drums", "bass"], 0.1);
        let (cache, decoder) = cache_with(store, 4);

        let first = cache.decode_and_store(1, &song).unwrap();
        let second = cache.decode_and_store(1, &song).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(decoder.decodes(), 2);
    }

    #[test]
    fn test_one_bad_track_fails_whole_song() {
        let store = MemoryStore::new();
        let mut song = store.insert_song(1, &["a", "b", "d"], 0.1);
        store.insert(1, "c", corrupt());
        song.insert(2, track("c"));
        let (cache, _) = cache_with(store, 4);

        let err = cache.decode_and_store(1, &song).unwrap_err();
        assert!(matches!(err, EngineError::Decode { ref filename, .. } if filename == "c"));
        assert!(!cache.has(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_track_bytes() {
        let store = MemoryStore::new();
        let mut song = store.insert_song(9, &["a"], 0.1);
        song.extend(tracks(&["ghost"]));
        let (cache, _) = cache_with(store, 4);

        let err = cache.decode_and_store(9, &song).unwrap_err();
        assert!(
            matches!(err, EngineError::TrackMissing { song_id: 9, ref filename } if filename == "ghost")
        );
        assert!(!cache.has(9));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let store = MemoryStore::new();
        let songs: Vec<Vec<Track>> = (0..4)
            .map(|id| store.insert_song(id, &["mix"], 0.01))
            .collect();
        let (cache, _) = cache_with(store, 3);

        for (id, song) in songs.iter().enumerate() {
            cache.decode_and_store(id as SongId, song).unwrap();
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.song_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_active_song_survives_eviction() {
        let store = MemoryStore::new();
        let songs: Vec<Vec<Track>> = (0..5)
            .map(|id| store.insert_song(id, &["mix"], 0.01))
            .collect();
        let (cache, _) = cache_with(store, 2);

        cache.decode_and_store(0, &songs[0]).unwrap();
        cache.set_active(Some(0));
        for id in 1..5 {
            cache.decode_and_store(id, &songs[id as usize]).unwrap();
            assert!(cache.len() <= 2);
            assert!(cache.has(0));
        }
        assert_eq!(cache.song_ids(), vec![0, 4]);
    }

    #[test]
    fn test_capacity_one_drops_preload_behind_active() {
        let store = MemoryStore::new();
        let a = store.insert_song(1, &["mix"], 0.01);
        let b = store.insert_song(2, &["mix"], 0.01);
        let (cache, _) = cache_with(store, 1);

        cache.load(1, &a).unwrap();
        let buffers = cache.decode_and_store(2, &b).unwrap();

        assert_eq!(buffers.song_id(), 2);
        assert_eq!(cache.song_ids(), vec![1]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_load_replaces_active_and_trims() {
        let store = MemoryStore::new();
        let a = store.insert_song(1, &["mix"], 0.01);
        let b = store.insert_song(2, &["mix"], 0.01);
        let (cache, decoder) = cache_with(store, 1);

        cache.load(1, &a).unwrap();
        cache.load(2, &b).unwrap();
        assert_eq!(cache.active(), Some(2));
        assert_eq!(cache.song_ids(), vec![2]);

        // Cache hit decodes nothing
        cache.load(2, &b).unwrap();
        assert_eq!(decoder.decodes(), 2);
        assert!(cache.evict_if_over_capacity().is_empty());
    }

    #[test]
    fn test_eviction_pass_is_noop_within_capacity() {
        let store = MemoryStore::new();
        let a = store.insert_song(1, &["mix"], 0.01);
        let b = store.insert_song(2, &["mix"], 0.01);
        let c = store.insert_song(3, &["mix"], 0.01);
        let (cache, _) = cache_with(store, 3);

        cache.load(1, &a).unwrap();
        cache.decode_and_store(2, &b).unwrap();
        cache.decode_and_store(3, &c).unwrap();
        cache.set_active(Some(3));
        assert!(cache.evict_if_over_capacity().is_empty());
        assert_eq!(cache.song_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_loaded_song_survives_preload_finishing_after_it() {
        let store = MemoryStore::new();
        let x = store.insert_song(10, &["mix"], 0.01);
        let a = store.insert_song(1, &["mix"], 0.01);
        let b = store.insert_song(2, &["mix"], 0.01);
        let (cache, _) = cache_with(store, 2);
        let cache = Arc::new(cache);

        cache.load(10, &x).unwrap();
        cache.load(1, &a).unwrap();
        let preload = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.decode_and_store(2, &b))
        };
        preload.join().unwrap().unwrap();

        assert_eq!(cache.active(), Some(1));
        assert!(cache.has(1));
        assert_eq!(cache.song_ids(), vec![1, 2]);
    }

    #[test]
    fn test_failed_load_keeps_previous_active() {
        let store = MemoryStore::new();
        let a = store.insert_song(1, &["mix"], 0.01);
        store.insert(2, "mix", corrupt());
        let (cache, _) = cache_with(store, 1);

        cache.load(1, &a).unwrap();
        assert!(cache.load(2, &tracks(&["mix"])).is_err());
        assert_eq!(cache.active(), Some(1));
        assert!(cache.has(1));
    }

    #[test]
    fn test_remove_refuses_active() {
        let store = MemoryStore::new();
        let a = store.insert_song(1, &["mix"], 0.01);
        let b = store.insert_song(2, &["mix"], 0.01);
        let (cache, _) = cache_with(store, 4);
        cache.decode_and_store(1, &a).unwrap();
        cache.decode_and_store(2, &b).unwrap();
        cache.set_active(Some(1));

        assert!(!cache.remove(1));
        assert!(cache.has(1));
        assert!(cache.remove(2));
        assert!(!cache.has(2));
        assert!(!cache.remove(2));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let store = MemoryStore::new();
        let a = store.insert_song(1, &["mix"], 0.01);
        let (cache, _) = cache_with(store, 4);
        cache.decode_and_store(1, &a).unwrap();
        cache.set_active(Some(1));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.active(), None);
        assert!(!cache.remove(1));
    }

    #[test]
    fn test_concurrent_requests_share_one_decode() {
        let store = MemoryStore::new();
        let song = store.insert_song(5, &["mix"], 0.01);
        let (decoder, started, release) = GatedDecoder::new();
        let decoder = Arc::new(decoder);
        let cache = Arc::new(DecodeCache::new(Arc::new(store), decoder.clone(), 4));

        let first = {
            let cache = Arc::clone(&cache);
            let song = song.clone();
            thread::spawn(move || cache.decode_and_store(5, &song))
        };
        started.recv().unwrap();

        let second = {
            let cache = Arc::clone(&cache);
            let song = song.clone();
            thread::spawn(move || cache.decode_and_store(5, &song))
        };
        release.send(()).unwrap();

        let a = first.join().unwrap().unwrap();
        let b = second.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(decoder.decodes(), 1);
    }

    #[test]
    fn test_clear_discards_in_flight_decode() {
        let store = MemoryStore::new();
        let song = store.insert_song(5, &["mix"], 0.01);
        let (decoder, started, release) = GatedDecoder::new();
        let cache = Arc::new(DecodeCache::new(Arc::new(store), Arc::new(decoder), 4));

        let worker = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.decode_and_store(5, &song))
        };
        started.recv().unwrap();
        cache.clear();
        release.send(()).unwrap();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(EngineError::Discarded(5))));
        assert!(!cache.has(5));
    }
}
