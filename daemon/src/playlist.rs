use anyhow::Result;
use common::ClipId;
use glob::glob;
use rand::Rng;
use std::path::Path;

/// Ordered, immutable set of clips the playlist draws from
#[derive(Debug, Clone)]
pub struct ClipLibrary {
    clips: Vec<ClipId>,
}

impl ClipLibrary {
    pub fn new(clips: Vec<ClipId>) -> Result<Self> {
        if clips.is_empty() {
            anyhow::bail!("Clip library is empty");
        }
        Ok(Self { clips })
    }

    /// Resolve clip sources (names, absolute paths, URIs or glob patterns)
    pub fn from_sources(base_path: &str, sources: &[String]) -> Result<Self> {
        let base = shellexpand::tilde(base_path);
        let mut clips: Vec<ClipId> = Vec::new();

        for source in sources {
            let expanded_source = shellexpand::tilde(source);

            // URIs are used as-is
            if expanded_source.contains("://") {
                Self::push_unique(&mut clips, ClipId::new(expanded_source.as_ref()));
                continue;
            }

            let joined = if Path::new(expanded_source.as_ref()).is_absolute() {
                expanded_source.to_string()
            } else {
                Path::new(base.as_ref())
                    .join(expanded_source.as_ref())
                    .to_string_lossy()
                    .to_string()
            };

            if !Self::is_glob(&joined) {
                Self::push_unique(&mut clips, ClipId::new(joined));
                continue;
            }

            match glob(&joined) {
                Ok(entries) => {
                    let mut matched: Vec<_> = entries.flatten().filter(|p| p.is_file()).collect();
                    matched.sort();
                    if matched.is_empty() {
                        log::warn!("Clip pattern '{}' matched no files", source);
                    }
                    for path in matched {
                        Self::push_unique(&mut clips, ClipId::new(path.to_string_lossy()));
                    }
                }
                Err(e) => {
                    log::warn!("Failed to glob pattern '{}': {}", source, e);
                }
            }
        }

        log::info!("Clip library has {} clip(s)", clips.len());
        Self::new(clips)
    }

    fn is_glob(source: &str) -> bool {
        source.contains(['*', '?', '['])
    }

    fn push_unique(clips: &mut Vec<ClipId>, clip: ClipId) {
        if !clips.contains(&clip) {
            clips.push(clip);
        }
    }

    pub fn clips(&self) -> &[ClipId] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    #[allow(dead_code)] // Counterpart of len() for clippy::len_without_is_empty
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

/// Circular play order generated once from a [`ClipLibrary`]
#[derive(Debug, Clone)]
pub struct Playlist {
    /// Generated play order
    entries: Vec<ClipId>,

    /// Index of the clip on the current slot
    current_index: usize,
}

impl Playlist {
    /// Draw `multiplier * library.len()` entries uniformly at random.
    ///
    /// Draws are independent (with replacement). When
    /// `allow_consecutive_repeats` is false and the library has more than one
    /// clip, a draw equal to its predecessor is redrawn, and the last entry
    /// also avoids the first one so the wrap-around does not repeat either.
    pub fn generate<R: Rng + ?Sized>(
        library: &ClipLibrary,
        multiplier: usize,
        allow_consecutive_repeats: bool,
        rng: &mut R,
    ) -> Self {
        let clips = library.clips();
        let len = multiplier.max(1) * clips.len();
        let mut picks: Vec<usize> = Vec::with_capacity(len);

        for slot in 0..len {
            let mut pick = rng.random_range(0..clips.len());

            if !allow_consecutive_repeats && clips.len() > 1 {
                let previous = picks.last().copied();
                // The wrap-around pair only needs a third distinct clip to be avoidable
                let first = if slot + 1 == len && slot > 0 && clips.len() > 2 {
                    picks.first().copied()
                } else {
                    None
                };
                while Some(pick) == previous || Some(pick) == first {
                    pick = rng.random_range(0..clips.len());
                }
            }

            picks.push(pick);
        }

        let entries: Vec<ClipId> = picks.into_iter().map(|i| clips[i].clone()).collect();

        log::info!(
            "Generated playlist of {} entries from {} clip(s) (consecutive repeats: {})",
            entries.len(),
            clips.len(),
            if allow_consecutive_repeats {
                "allowed"
            } else {
                "avoided"
            }
        );

        Self {
            entries,
            current_index: 0,
        }
    }

    /// Library order repeated `multiplier` times
    pub fn sequential(library: &ClipLibrary, multiplier: usize) -> Self {
        let entries: Vec<ClipId> = (0..multiplier.max(1))
            .flat_map(|_| library.clips().iter().cloned())
            .collect();

        log::info!(
            "Generated sequential playlist of {} entries from {} clip(s)",
            entries.len(),
            library.len()
        );

        Self {
            entries,
            current_index: 0,
        }
    }

    /// Get the clip at a playlist index (wraps around)
    pub fn get(&self, index: usize) -> &ClipId {
        &self.entries[index % self.entries.len()]
    }

    /// Get the clip at the current position
    pub fn current(&self) -> &ClipId {
        self.get(self.current_index)
    }

    /// Index of the entry after `index`
    pub fn next_index_after(&self, index: usize) -> usize {
        (index + 1) % self.entries.len()
    }

    /// Index of the entry after the current one
    pub fn next_index(&self) -> usize {
        self.next_index_after(self.current_index)
    }

    /// Move the pointer forward by exactly one entry
    pub fn advance(&mut self) -> usize {
        self.current_index = self.next_index();
        self.current_index
    }

    /// The `distance` entries following `index`, in play order
    pub fn upcoming(&self, index: usize, distance: usize) -> impl Iterator<Item = (usize, &ClipId)> {
        (1..=distance).map(move |offset| {
            let i = (index + offset) % self.entries.len();
            (i, &self.entries[i])
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)] // Counterpart of len() for clippy::len_without_is_empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }
}

#[cfg(test)]
impl Playlist {
    pub fn entries(&self) -> &[ClipId] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn library() -> ClipLibrary {
        ClipLibrary::new(
            ["A", "B", "C", "D", "E"]
                .iter()
                .map(|s| ClipId::new(*s))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_library_rejected() {
        assert!(ClipLibrary::new(Vec::new()).is_err());
    }

    #[test]
    fn test_sources_resolve_against_base_path() {
        let sources = vec![
            "bg_01.mp4".to_string(),
            "https://cdn.example.com/bg_02.mp4".to_string(),
            "/opt/bg/bg_03.mp4".to_string(),
            "bg_01.mp4".to_string(),
        ];
        let library = ClipLibrary::from_sources("/srv/bg", &sources).unwrap();

        assert_eq!(
            library.clips(),
            &[
                ClipId::new("/srv/bg/bg_01.mp4"),
                ClipId::new("https://cdn.example.com/bg_02.mp4"),
                ClipId::new("/opt/bg/bg_03.mp4"),
            ]
        );
    }

    #[test]
    fn test_sources_expand_globs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.mp4", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let library = ClipLibrary::from_sources(
            dir.path().to_str().unwrap(),
            &["*.mp4".to_string()],
        )
        .unwrap();

        let names: Vec<&str> = library.clips().iter().map(|c| c.file_name()).collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);
    }

    #[test]
    fn test_playlist_length_is_multiple_of_library() {
        let mut rng = StdRng::seed_from_u64(7);
        let playlist = Playlist::generate(&library(), 5, true, &mut rng);

        assert_eq!(playlist.len(), 25);
        for clip in playlist.entries() {
            assert!(library().clips().contains(clip));
        }
    }

    #[test]
    fn test_playlist_is_reproducible_with_seed() {
        let a = Playlist::generate(&library(), 5, true, &mut StdRng::seed_from_u64(42));
        let b = Playlist::generate(&library(), 5, true, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.entries(), b.entries());
    }

    #[test]
    fn test_playlist_without_repeats() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let playlist = Playlist::generate(&library(), 5, false, &mut rng);
            let entries = playlist.entries();

            for pair in entries.windows(2) {
                assert_ne!(pair[0], pair[1]);
            }
            assert_ne!(entries.first(), entries.last());
        }
    }

    #[test]
    fn test_sequential_playlist_order() {
        let playlist = Playlist::sequential(&library(), 2);
        let names: Vec<&str> = playlist.entries().iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D", "E", "A", "B", "C", "D", "E"]);
    }

    #[test]
    fn test_single_clip_library_repeats() {
        let library = ClipLibrary::new(vec![ClipId::new("only.mp4")]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let playlist = Playlist::generate(&library, 3, false, &mut rng);

        assert_eq!(playlist.len(), 3);
        assert!(playlist.entries().iter().all(|c| c.as_str() == "only.mp4"));
    }

    #[test]
    fn test_playlist_navigation_wraps() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut playlist = Playlist::generate(&library(), 1, true, &mut rng);
        let first = playlist.current().clone();

        for _ in 0..playlist.len() {
            playlist.advance();
        }

        assert_eq!(playlist.current_index(), 0);
        assert_eq!(playlist.current(), &first);
    }

    #[test]
    fn test_upcoming_wraps_around() {
        let mut rng = StdRng::seed_from_u64(5);
        let playlist = Playlist::generate(&library(), 1, true, &mut rng);

        let indices: Vec<usize> = playlist.upcoming(3, 3).map(|(i, _)| i).collect();
        assert_eq!(indices, vec![4, 0, 1]);
    }
}
