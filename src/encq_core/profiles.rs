//! Profile persistence: built-in presets, CRUD, and per-record forward
//! migration of profiles.json.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::encq_core::domain::{
    AudioMode, Codec, PROFILE_VERSION, Profile, RateControl, validate_profile,
};
use crate::encq_core::error::EncqError;
use crate::encq_core::ids::short_id;
use crate::encq_core::settings::io;
use crate::sync_ext::MutexExt;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfilesFile {
    profiles: Vec<Profile>,
}

pub struct ProfileManager {
    path: PathBuf,
    profiles: Mutex<Vec<Profile>>,
}

impl ProfileManager {
    pub fn new(path: PathBuf) -> Self {
        ProfileManager {
            path,
            profiles: Mutex::new(Vec::new()),
        }
    }

    /// Loads profiles.json. Missing file seeds the built-in presets. A flat
    /// `[{..}]` legacy layout is accepted and rewritten in the wrapped
    /// format; anything unparseable is quarantined and presets regenerated.
    pub fn load(&self) -> Result<Vec<Profile>, EncqError> {
        if !self.path.exists() {
            let presets = built_in_presets();
            self.persist(&presets)?;
            *self.profiles.lock_unpoisoned() = presets.clone();
            return Ok(presets);
        }

        let (mut loaded, mut needs_resave) = match io::read_json_file::<ProfilesFile>(&self.path) {
            Ok(file) => (file.profiles, false),
            Err(_) => match io::read_json_file::<Vec<Profile>>(&self.path) {
                Ok(flat) => (flat, true),
                Err(err) => {
                    crate::debug_eprintln!("profiles.json unreadable, regenerating: {err:#}");
                    io::quarantine_broken_file(&self.path);
                    let presets = built_in_presets();
                    self.persist(&presets)?;
                    *self.profiles.lock_unpoisoned() = presets.clone();
                    return Ok(presets);
                }
            },
        };

        for profile in &mut loaded {
            let (migrated, changed) = migrate_profile(std::mem::take(profile));
            *profile = migrated;
            needs_resave |= changed;
        }

        if needs_resave {
            self.persist(&loaded)?;
        }
        *self.profiles.lock_unpoisoned() = loaded.clone();
        Ok(loaded)
    }

    pub fn list(&self) -> Vec<Profile> {
        self.profiles.lock_unpoisoned().clone()
    }

    pub fn get(&self, id: &str) -> Option<Profile> {
        self.profiles
            .lock_unpoisoned()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Creates or updates a profile. Built-in presets are immutable.
    pub fn upsert(&self, mut profile: Profile) -> Result<Profile, EncqError> {
        let errs = validate_profile(&profile);
        if !errs.is_empty() {
            return Err(EncqError::validation(errs));
        }

        let mut profiles = self.profiles.lock_unpoisoned();
        if let Some(existing) = profiles.iter_mut().find(|p| p.id == profile.id) {
            if existing.is_preset {
                return Err(EncqError::validation_field(
                    "id",
                    "preset profiles cannot be edited",
                ));
            }
            profile.version = PROFILE_VERSION;
            *existing = profile.clone();
        } else {
            if profile.id.is_empty() {
                profile.id = format!("p_{}", short_id(12));
            }
            profile.version = PROFILE_VERSION;
            profile.is_preset = false;
            profiles.push(profile.clone());
        }
        self.persist(&profiles)?;
        Ok(profile)
    }

    pub fn delete(&self, id: &str) -> Result<(), EncqError> {
        let mut profiles = self.profiles.lock_unpoisoned();
        let Some(index) = profiles.iter().position(|p| p.id == id) else {
            return Err(EncqError::validation_field("id", "profile not found"));
        };
        if profiles[index].is_preset {
            return Err(EncqError::validation_field(
                "id",
                "preset profiles cannot be deleted",
            ));
        }
        profiles.remove(index);
        self.persist(&profiles)
    }

    /// Clones an existing profile under a new name; the copy is always a
    /// user profile, even when the source is a preset.
    pub fn duplicate(&self, id: &str, new_name: &str) -> Result<Profile, EncqError> {
        let new_name = new_name.trim();
        let name_len = new_name.chars().count();
        if name_len < 1 || name_len > 80 {
            return Err(EncqError::validation_field("name", "must be 1..80 chars"));
        }

        let mut profiles = self.profiles.lock_unpoisoned();
        let Some(source) = profiles.iter().find(|p| p.id == id).cloned() else {
            return Err(EncqError::validation_field("id", "profile not found"));
        };
        let mut copy = source;
        copy.id = format!("p_{}", short_id(12));
        copy.name = new_name.to_string();
        copy.is_preset = false;
        profiles.push(copy.clone());
        self.persist(&profiles)?;
        Ok(copy)
    }

    fn persist(&self, profiles: &[Profile]) -> Result<(), EncqError> {
        let file = ProfilesFile {
            profiles: profiles.to_vec(),
        };
        io::write_json_file(&self.path, &file).map_err(|err| EncqError::Io(format!("{err:#}")))
    }
}

/// Forward-only schema migration for one profile. Versions below the current
/// one arrive with missing fields already filled by serde defaults; the pass
/// stamps the current version.
pub fn migrate_profile(mut profile: Profile) -> (Profile, bool) {
    let mut changed = false;
    if profile.version < PROFILE_VERSION {
        profile.version = PROFILE_VERSION;
        changed = true;
    }
    (profile, changed)
}

pub fn built_in_presets() -> Vec<Profile> {
    let base = Profile::default();

    let mut hevc = base.clone();
    hevc.id = "preset-hevc-quality".to_string();
    hevc.name = "HEVC Quality".to_string();
    hevc.is_preset = true;

    let mut av1 = base.clone();
    av1.id = "preset-av1-fast".to_string();
    av1.name = "AV1 Fast".to_string();
    av1.is_preset = true;
    av1.codec = Codec::Av1;
    av1.rate_value = 32.0;
    av1.preset = "P1".to_string();

    let mut camera = base.clone();
    camera.id = "preset-camera-archive".to_string();
    camera.name = "Camera Archive".to_string();
    camera.is_preset = true;
    camera.rate_value = 24.0;
    camera.preset = "P7".to_string();
    camera.restore_file_time = true;

    let mut h264 = base;
    h264.id = "preset-h264-compatible".to_string();
    h264.name = "H.264 Compatible".to_string();
    h264.is_preset = true;
    h264.codec = Codec::H264;
    h264.rate_control = RateControl::Qvbr;
    h264.rate_value = 26.0;
    h264.output_depth = 8;
    h264.audio_mode = AudioMode::Aac;
    h264.audio_bitrate = 256;

    vec![hevc, av1, camera, h264]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encq_core::domain::EncoderType;

    fn manager_in(dir: &tempfile::TempDir) -> ProfileManager {
        ProfileManager::new(dir.path().join("profiles.json"))
    }

    #[test]
    fn missing_file_seeds_presets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        let profiles = mgr.load().expect("load presets");
        assert_eq!(profiles.len(), 4);
        assert!(profiles.iter().all(|p| p.is_preset));
        assert!(profiles.iter().all(|p| p.encoder_type == EncoderType::Nvencc));
    }

    #[test]
    fn presets_are_valid_profiles() {
        for preset in built_in_presets() {
            assert!(
                validate_profile(&preset).is_empty(),
                "preset {} fails validation",
                preset.name
            );
        }
    }

    #[test]
    fn flat_array_layout_is_accepted_and_rewritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flat = serde_json::to_string(&built_in_presets()).expect("serialize flat");
        std::fs::write(dir.path().join("profiles.json"), flat).expect("seed flat file");

        let mgr = manager_in(&dir);
        let profiles = mgr.load().expect("load flat");
        assert_eq!(profiles.len(), 4);

        let raw = std::fs::read_to_string(dir.path().join("profiles.json")).expect("reread");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("parse rewritten");
        assert!(value.get("profiles").is_some(), "must rewrite wrapped layout");
    }

    #[test]
    fn upsert_assigns_id_and_rejects_preset_edits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        mgr.load().expect("seed");

        let mut user = Profile::default();
        user.name = "My profile".to_string();
        let saved = mgr.upsert(user).expect("upsert new");
        assert!(saved.id.starts_with("p_"));
        assert!(!saved.is_preset);

        let mut preset_edit = mgr.get("preset-hevc-quality").expect("preset");
        preset_edit.rate_value = 20.0;
        let err = mgr.upsert(preset_edit).expect_err("preset edit must fail");
        assert_eq!(err.code(), "E_VALIDATION");
    }

    #[test]
    fn duplicate_clones_preset_as_user_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        mgr.load().expect("seed");

        let copy = mgr
            .duplicate("preset-av1-fast", "AV1 tweaked")
            .expect("duplicate");
        assert!(!copy.is_preset);
        assert_eq!(copy.name, "AV1 tweaked");
        assert_ne!(copy.id, "preset-av1-fast");
        assert_eq!(mgr.list().len(), 5);
    }

    #[test]
    fn delete_protects_presets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mgr = manager_in(&dir);
        mgr.load().expect("seed");
        assert!(mgr.delete("preset-hevc-quality").is_err());

        let user = mgr
            .duplicate("preset-hevc-quality", "deletable")
            .expect("duplicate");
        mgr.delete(&user.id).expect("delete user profile");
        assert!(mgr.get(&user.id).is_none());
    }

    #[test]
    fn version_zero_profiles_are_migrated_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("profiles.json"),
            r#"{"profiles": [{"id": "old", "name": "Old", "rate_value": 23.0}]}"#,
        )
        .expect("seed v0");
        let mgr = manager_in(&dir);
        let profiles = mgr.load().expect("load v0");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].version, PROFILE_VERSION);
    }
}
