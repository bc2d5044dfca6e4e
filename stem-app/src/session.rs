//! Prompt session - applies commands to the engine and library

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};

use stem_audio::{AudioEngine, PlaybackState};
use stem_library::{
    Config, DownloadProgress, HttpFetcher, LibraryDb, Setlist, Song, SongCatalog,
};

use crate::commands::{format_time, Command, HELP};

/// Setlist being worked through
struct OpenSetlist {
    setlist: Setlist,
    songs: Vec<Song>,
    position: usize,
}

pub struct Session {
    config: Config,
    engine: AudioEngine,
    db: Arc<LibraryDb>,
    catalog: SongCatalog,
    fetcher: HttpFetcher,
    /// Catalog entry of the active song, for track names
    loaded: Option<Song>,
    setlist: Option<OpenSetlist>,
}

impl Session {
    pub fn new(config: Config, engine: AudioEngine, db: Arc<LibraryDb>, catalog: SongCatalog) -> Self {
        Self {
            config,
            engine,
            db,
            catalog,
            fetcher: HttpFetcher::new(),
            loaded: None,
            setlist: None,
        }
    }

    /// Apply one command. Returns false when the session should end.
    pub fn handle(&mut self, command: Command) -> anyhow::Result<bool> {
        match command {
            Command::Quit => return Ok(false),
            Command::Help => println!("{HELP}"),

            Command::Songs => self.list_songs()?,
            Command::Download(slug) => self.download(&slug)?,
            Command::Delete(slug) => self.delete(&slug)?,
            Command::Storage => {
                let used = self.db.get_storage_used()?;
                println!(
                    "{:.1} MB downloaded, {} of {} songs decoded in memory",
                    used,
                    self.engine.cached_song_count(),
                    self.config.cache_capacity
                );
            }

            Command::Load(slug) => {
                let song = self.find_downloaded(&slug)?;
                self.load(song)?;
            }
            Command::Preload(slug) => {
                let song = self.find_downloaded(&slug)?;
                // Detached; the result shows up in `songs`
                drop(self.engine.preload_song(song.id, song.tracks));
                println!("Preloading {}", song.title);
            }
            Command::Evict(slug) => {
                let song = self.find_song(&slug)?;
                if self.engine.clear_song_from_cache(song.id) {
                    println!("Released {}", song.title);
                } else {
                    println!("{} is not decoded or is playing", song.title);
                }
            }

            Command::Play => self.engine.play(),
            Command::Pause => self.engine.pause(),
            Command::Stop => self.engine.stop(),
            Command::Toggle => self.engine.toggle(),
            Command::Seek(secs) => self.engine.seek(secs),
            Command::Volume(track, level) => {
                let key = self.track_key(&track)?;
                self.engine.set_track_volume(&key, level);
            }
            Command::Mute(track, muted) => {
                let key = self.track_key(&track)?;
                self.engine.set_track_muted(&key, muted);
            }
            Command::Solo(track, solo) => {
                let key = self.track_key(&track)?;
                self.engine.set_track_solo(&key, solo);
            }
            Command::Reset => self.engine.reset_track_states(),
            Command::Status => self.print_status(),
            Command::Watch(secs) => self.watch(Duration::from_secs_f64(secs))?,

            Command::Setlists => self.list_setlists()?,
            Command::SetlistNew { name, slugs } => self.new_setlist(name, slugs)?,
            Command::SetlistOpen(id) => self.open_setlist(&id)?,
            Command::SetlistAdd { id, slugs } => self.edit_setlist(&id, |setlist| {
                setlist.add_songs(slugs);
                true
            })?,
            Command::SetlistRemove { id, slug } => {
                self.edit_setlist(&id, |setlist| setlist.remove_song(&slug))?
            }
            Command::SetlistRename { id, name } => self.edit_setlist(&id, |setlist| {
                setlist.name = name;
                true
            })?,
            Command::SetlistDelete(id) => {
                if self.db.delete_setlist(&id)? {
                    if self.setlist.as_ref().is_some_and(|s| s.setlist.id == id) {
                        self.setlist = None;
                    }
                    println!("Deleted setlist {id}");
                } else {
                    println!("No setlist {id}");
                }
            }
            Command::Next => self.step_setlist(1)?,
            Command::Prev => self.step_setlist(-1)?,
        }

        Ok(true)
    }

    /// Downloaded copy first so the prompt works offline, then the catalog
    fn find_song(&self, slug: &str) -> anyhow::Result<Song> {
        for cached in self.db.get_cached_songs()? {
            if cached.slug == slug {
                return cached
                    .song()
                    .with_context(|| format!("stored metadata for '{slug}' is unreadable"));
            }
        }

        self.catalog
            .fetch_song_by_slug(slug)
            .ok_or_else(|| anyhow!("song '{slug}' not found"))
    }

    fn find_downloaded(&self, slug: &str) -> anyhow::Result<Song> {
        let song = self.find_song(slug)?;
        if !self.db.is_song_cached(song.id)? {
            bail!("'{slug}' is not downloaded yet (try: download {slug})");
        }
        Ok(song)
    }

    fn load(&mut self, song: Song) -> anyhow::Result<()> {
        let started = Instant::now();
        self.engine.load_song(song.id, &song.tracks)?;

        println!(
            "Loaded {} ({}) in {} ms",
            song.title,
            format_time(self.engine.get_duration()),
            started.elapsed().as_millis()
        );
        for track in &song.tracks {
            println!("  {:<28} {}", track.key(), track.display_name);
        }

        self.loaded = Some(song);
        Ok(())
    }

    /// Match a track by key, key stem or display name
    fn track_key(&self, name: &str) -> anyhow::Result<String> {
        let song = self.loaded.as_ref().context("no song loaded")?;
        let wanted = name.to_lowercase();

        song.tracks
            .iter()
            .find(|t| {
                let key = t.key().to_lowercase();
                key == wanted
                    || key.rsplit_once('.').is_some_and(|(stem, _)| stem == wanted)
                    || t.display_name.to_lowercase() == wanted
            })
            .map(|t| t.key().to_string())
            .ok_or_else(|| anyhow!("no track '{name}' in {}", song.title))
    }

    fn list_songs(&self) -> anyhow::Result<()> {
        let songs = match self.catalog.fetch_all_songs() {
            Ok(songs) => songs,
            Err(e) => {
                tracing::warn!("Catalog unavailable, listing downloaded songs: {}", e);
                self.db
                    .get_cached_songs()?
                    .iter()
                    .filter_map(|c| c.song().ok())
                    .collect()
            }
        };

        for song in &songs {
            let downloaded = if self.db.is_song_cached(song.id)? { '*' } else { ' ' };
            let decoded = if self.engine.is_song_cached(song.id) { '+' } else { ' ' };
            let bpm = song.bpm.map(|b| format!("{b:.0} bpm")).unwrap_or_default();
            println!(
                "{downloaded}{decoded} {:<32} {:<28} {:>2} tracks {:>7.1} MB  {}",
                song.slug,
                song.title,
                song.tracks.len(),
                song.total_size_mb,
                bpm
            );
        }
        println!("{} songs", songs.len());
        Ok(())
    }

    fn download(&self, slug: &str) -> anyhow::Result<()> {
        let song = self.find_song(slug)?;
        if self.db.is_song_cached(song.id)? {
            println!("{} is already downloaded", song.title);
            return Ok(());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let printer = thread::spawn(move || {
            for progress in rx {
                match progress {
                    DownloadProgress::Started { total } => println!("Downloading {total} tracks"),
                    DownloadProgress::Track {
                        current,
                        total,
                        filename,
                    } => println!("  [{current}/{total}] {filename}"),
                    DownloadProgress::Complete { total_size_mb, .. } => {
                        println!("Done, {total_size_mb:.1} MB")
                    }
                }
            }
        });

        let result = self.db.cache_song(&self.fetcher, &song, Some(tx));
        let _ = printer.join();
        result.with_context(|| format!("download of '{slug}' failed"))
    }

    fn delete(&mut self, slug: &str) -> anyhow::Result<()> {
        let song = self.find_song(slug)?;
        if self.engine.active_song_id() == Some(song.id) {
            bail!("{} is loaded; load another song first", song.title);
        }

        self.engine.clear_song_from_cache(song.id);
        if self.db.delete_cached_song(song.id)? {
            println!("Deleted {}", song.title);
        } else {
            println!("{} was not downloaded", song.title);
        }
        Ok(())
    }

    fn print_status(&self) {
        let title = self
            .loaded
            .as_ref()
            .filter(|s| Some(s.id) == self.engine.active_song_id())
            .map(|s| s.title.as_str())
            .unwrap_or("-");

        println!(
            "{:<8} {} / {}  {}",
            self.engine.playback_state().label(),
            format_time(self.engine.get_current_time()),
            format_time(self.engine.get_duration()),
            title
        );

        for (key, state) in self.engine.track_states() {
            let gain = self.engine.track_gain(&key).unwrap_or(0.0);
            println!(
                "  {:<28} vol {:>4.2}  {}{}  out {:>4.2}",
                key,
                state.volume,
                if state.muted { 'M' } else { '-' },
                if state.solo { 'S' } else { '-' },
                gain
            );
        }

        if let Some(open) = &self.setlist {
            println!(
                "setlist {} [{}/{}]",
                open.setlist.name,
                open.position + 1,
                open.songs.len()
            );
        }
    }

    fn watch(&self, length: Duration) -> anyhow::Result<()> {
        let until = Instant::now() + length;
        let mut stdout = io::stdout();

        while Instant::now() < until && self.engine.playback_state() == PlaybackState::Playing {
            write!(
                stdout,
                "\r{} / {}",
                format_time(self.engine.get_current_time()),
                format_time(self.engine.get_duration())
            )?;
            stdout.flush()?;
            thread::sleep(self.config.poll_interval());
        }
        writeln!(stdout)?;
        Ok(())
    }

    fn list_setlists(&self) -> anyhow::Result<()> {
        let setlists = self.db.get_setlists()?;
        if setlists.is_empty() {
            println!("No setlists");
        }
        for setlist in setlists {
            println!(
                "{:<14} {:<24} {} songs",
                setlist.id,
                setlist.name,
                setlist.song_slugs.len()
            );
        }
        Ok(())
    }

    fn new_setlist(&self, name: String, slugs: Vec<String>) -> anyhow::Result<()> {
        match self.catalog.fetch_songs_by_slugs(&slugs) {
            Ok(lookup) if !lookup.missing_slugs.is_empty() => {
                println!("Not in catalog: {}", lookup.missing_slugs.join(", "));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not check slugs against catalog: {}", e),
        }

        let mut setlist = Setlist::new(name, slugs);
        self.db.save_setlist(&mut setlist)?;
        println!("Saved setlist {} ({})", setlist.name, setlist.id);
        Ok(())
    }

    /// Apply `edit` to a stored setlist and save it if anything changed
    fn edit_setlist(
        &mut self,
        id: &str,
        edit: impl FnOnce(&mut Setlist) -> bool,
    ) -> anyhow::Result<()> {
        let mut setlist = self
            .db
            .get_setlist(id)?
            .ok_or_else(|| anyhow!("no setlist {id}"))?;

        if !edit(&mut setlist) {
            println!("Setlist {} unchanged", setlist.name);
            return Ok(());
        }
        self.db.save_setlist(&mut setlist)?;
        println!(
            "Saved setlist {} ({} songs)",
            setlist.name,
            setlist.song_slugs.len()
        );

        if self.setlist.as_ref().is_some_and(|o| o.setlist.id == setlist.id) {
            let songs = self.downloaded_songs(&setlist);
            let active = self.engine.active_song_id();
            let position = songs
                .iter()
                .position(|s| Some(s.id) == active)
                .unwrap_or(0);
            self.setlist = Some(OpenSetlist {
                setlist,
                songs,
                position,
            });
        }
        Ok(())
    }

    /// Load the first song and decode the rest in the background
    fn open_setlist(&mut self, id: &str) -> anyhow::Result<()> {
        let setlist = self
            .db
            .get_setlist(id)?
            .ok_or_else(|| anyhow!("no setlist {id}"))?;

        let songs = self.downloaded_songs(&setlist);
        let Some(first) = songs.first().cloned() else {
            bail!("setlist {} has no downloaded songs", setlist.name);
        };

        self.load(first)?;
        for song in songs.iter().skip(1) {
            drop(self.engine.preload_song(song.id, song.tracks.clone()));
        }

        println!("Opened {} ({} songs)", setlist.name, songs.len());
        self.setlist = Some(OpenSetlist {
            setlist,
            songs,
            position: 0,
        });
        Ok(())
    }

    /// Songs of a setlist that can be played offline, in running order
    fn downloaded_songs(&self, setlist: &Setlist) -> Vec<Song> {
        let mut songs = Vec::with_capacity(setlist.song_slugs.len());
        for slug in &setlist.song_slugs {
            match self.find_downloaded(slug) {
                Ok(song) => songs.push(song),
                Err(e) => println!("Skipping {slug}: {e}"),
            }
        }
        songs
    }

    fn step_setlist(&mut self, step: isize) -> anyhow::Result<()> {
        let open = self.setlist.as_ref().context("no setlist open")?;
        let next = open.position as isize + step;
        if next < 0 || next as usize >= open.songs.len() {
            bail!("no more songs in {}", open.setlist.name);
        }

        let next = next as usize;
        let song = open.songs[next].clone();
        let following = open.songs.get(next + 1).cloned();

        self.load(song)?;
        if let Some(open) = self.setlist.as_mut() {
            open.position = next;
        }
        if let Some(song) = following {
            drop(self.engine.preload_song(song.id, song.tracks));
        }
        Ok(())
    }
}
