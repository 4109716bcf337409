use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::observers::{ObserverSet, Subscription};
use crate::persist::{AggregateSnapshot, SnapshotError};

const DEFAULT_MUSIC_VOLUME: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityLevel {
    Low,
    Middle,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingsChange {
    Quality(QualityLevel),
    MusicVolume(f32),
    ShowFps(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SettingsData {
    quality: QualityLevel,
    music_volume: f32,
    show_fps: bool,
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            quality: QualityLevel::High,
            music_volume: DEFAULT_MUSIC_VOLUME,
            show_fps: true,
        }
    }
}

/// Live game settings. Setters notify observers only when the value
/// actually changes; applying a loaded snapshot is silent, so a restore
/// never re-dirties the save pipeline it came from.
#[derive(Default)]
pub struct GameSettings {
    data: Mutex<SettingsData>,
    observers: ObserverSet<SettingsChange>,
}

impl GameSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quality(&self) -> QualityLevel {
        self.lock_data().quality
    }

    pub fn music_volume(&self) -> f32 {
        self.lock_data().music_volume
    }

    pub fn show_fps(&self) -> bool {
        self.lock_data().show_fps
    }

    pub fn set_quality(&self, quality: QualityLevel) {
        let changed = {
            let mut data = self.lock_data();
            if data.quality == quality {
                false
            } else {
                data.quality = quality;
                true
            }
        };
        if changed {
            self.observers.emit(&SettingsChange::Quality(quality));
        }
    }

    pub fn set_music_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        let changed = {
            let mut data = self.lock_data();
            if data.music_volume == volume {
                false
            } else {
                data.music_volume = volume;
                true
            }
        };
        if changed {
            self.observers.emit(&SettingsChange::MusicVolume(volume));
        }
    }

    pub fn set_show_fps(&self, show_fps: bool) {
        let changed = {
            let mut data = self.lock_data();
            if data.show_fps == show_fps {
                false
            } else {
                data.show_fps = show_fps;
                true
            }
        };
        if changed {
            self.observers.emit(&SettingsChange::ShowFps(show_fps));
        }
    }

    pub fn observe(&self, callback: impl Fn(&SettingsChange) + Send + Sync + 'static) -> Subscription {
        self.observers.observe(callback)
    }

    /// Replaces the live values with a persisted snapshot, without
    /// notifications.
    pub fn apply_loaded(&self, serialized: &str) -> Result<(), SnapshotError> {
        let mut loaded: SettingsData =
            serde_json::from_str(serialized).map_err(SnapshotError::Decode)?;
        loaded.music_volume = clamp_volume(loaded.music_volume);
        *self.lock_data() = loaded;
        Ok(())
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, SettingsData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AggregateSnapshot for GameSettings {
    fn snapshot(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(&*self.lock_data()).map_err(SnapshotError::Encode)
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if !volume.is_finite() {
        return DEFAULT_MUSIC_VOLUME;
    }
    volume.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn change_counter(settings: &GameSettings) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let subscription = settings.observe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn defaults_match_first_launch() {
        let settings = GameSettings::new();
        assert_eq!(settings.quality(), QualityLevel::High);
        assert_eq!(settings.music_volume(), 1.0);
        assert!(settings.show_fps());
    }

    #[test]
    fn setters_notify_only_on_actual_change() {
        let settings = GameSettings::new();
        let (count, _subscription) = change_counter(&settings);

        settings.set_quality(QualityLevel::High); // already High
        settings.set_show_fps(true); // already true
        assert_eq!(count.load(Ordering::SeqCst), 0);

        settings.set_quality(QualityLevel::Low);
        settings.set_show_fps(false);
        settings.set_music_volume(0.5);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn volume_is_clamped_and_non_finite_falls_back() {
        let settings = GameSettings::new();
        settings.set_music_volume(7.0);
        assert_eq!(settings.music_volume(), 1.0);

        settings.set_music_volume(-3.0);
        assert_eq!(settings.music_volume(), 0.0);

        settings.set_music_volume(f32::NAN);
        assert_eq!(settings.music_volume(), 1.0);
    }

    #[test]
    fn clamped_to_same_value_does_not_notify() {
        let settings = GameSettings::new();
        let (count, _subscription) = change_counter(&settings);

        // Volume defaults to 1.0; an over-range set clamps back to 1.0.
        settings.set_music_volume(2.5);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snapshot_then_apply_loaded_round_trips() {
        let settings = GameSettings::new();
        settings.set_quality(QualityLevel::Middle);
        settings.set_music_volume(0.25);
        settings.set_show_fps(false);
        let serialized = settings.snapshot().expect("snapshot");

        let restored = GameSettings::new();
        restored.apply_loaded(&serialized).expect("apply");

        assert_eq!(restored.quality(), QualityLevel::Middle);
        assert_eq!(restored.music_volume(), 0.25);
        assert!(!restored.show_fps());
    }

    #[test]
    fn apply_loaded_is_silent() {
        let settings = GameSettings::new();
        let (count, _subscription) = change_counter(&settings);

        settings
            .apply_loaded(r#"{"quality":"Low","music_volume":0.5,"show_fps":false}"#)
            .expect("apply");

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(settings.quality(), QualityLevel::Low);
    }

    #[test]
    fn apply_loaded_rejects_garbage() {
        let settings = GameSettings::new();
        let err = settings.apply_loaded("not settings").expect_err("garbage");
        assert!(matches!(err, SnapshotError::Decode(_)));
        assert_eq!(settings.quality(), QualityLevel::High);
    }

    #[test]
    fn dropped_subscription_stops_notifying() {
        let settings = GameSettings::new();
        let (count, subscription) = change_counter(&settings);

        settings.set_show_fps(false);
        drop(subscription);
        settings.set_show_fps(true);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
