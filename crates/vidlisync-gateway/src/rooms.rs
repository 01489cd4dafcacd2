//! Presentation rooms.
//!
//! Room state lives behind one mutex whose critical sections never span an
//! await. Every mutating operation returns the messages it produced as a list
//! of [`Delivery`]s; the caller sends them after the lock is released.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::info;

use vidlisync_core::error::{Result, SyncError};
use vidlisync_core::protocol::{ParticipantInfo, ServerMessage};
use vidlisync_core::types::{FanoutResult, VoiceProfile};

/// A message addressed to one connection.
pub type Delivery = (String, ServerMessage);

/// Stream session id used for a room's presenter audio.
pub fn room_session_id(room_code: &str) -> String {
    format!("presenter_{room_code}")
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub name: String,
    pub language: String,
}

#[derive(Debug, Default)]
pub struct Room {
    participants: HashMap<String, Participant>,
    muted: HashSet<String>,
    raised_hands: HashSet<String>,
    presenter: Option<String>,
    presenter_voice: VoiceProfile,
}

impl Room {
    fn info(&self, conn_id: &str, p: &Participant) -> ParticipantInfo {
        ParticipantInfo {
            connection_id: conn_id.to_string(),
            name: p.name.clone(),
            language: p.language.clone(),
            is_presenter: self.presenter.as_deref() == Some(conn_id),
            is_muted: self.muted.contains(conn_id),
            has_raised_hand: self.raised_hands.contains(conn_id),
        }
    }

    fn roster(&self) -> Vec<ParticipantInfo> {
        let mut roster: Vec<_> = self
            .participants
            .iter()
            .map(|(id, p)| self.info(id, p))
            .collect();
        roster.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        roster
    }

    fn broadcast(&self, msg: &ServerMessage) -> Vec<Delivery> {
        self.participants
            .keys()
            .map(|id| (id.clone(), msg.clone()))
            .collect()
    }

    fn require_presenter(&self, conn_id: &str, action: &str) -> Result<()> {
        if self.presenter.as_deref() == Some(conn_id) {
            Ok(())
        } else {
            Err(SyncError::Unauthorized(format!(
                "Only the presenter can {action}"
            )))
        }
    }

    fn require_member(&self, conn_id: &str) -> Result<&Participant> {
        self.participants
            .get(conn_id)
            .ok_or_else(|| SyncError::NotFound(format!("Participant {conn_id} not in room")))
    }

    /// Distinct languages of listening (non-presenter) participants.
    pub fn listener_languages(&self) -> Vec<String> {
        self.participants
            .iter()
            .filter(|(id, _)| self.presenter.as_deref() != Some(id.as_str()))
            .map(|(_, p)| p.language.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every language key and every muted/raised-hand member is a participant,
    /// and the presenter, if any, is a participant.
    pub fn is_consistent(&self) -> bool {
        self.muted.iter().all(|id| self.participants.contains_key(id))
            && self
                .raised_hands
                .iter()
                .all(|id| self.participants.contains_key(id))
            && self
                .presenter
                .as_ref()
                .is_none_or(|id| self.participants.contains_key(id))
    }
}

/// Presenter audio accepted for processing.
#[derive(Debug, Clone)]
pub struct PresenterStream {
    pub session_id: String,
    pub target_languages: Vec<String>,
    pub source_language: String,
    pub voice_profile: VoiceProfile,
}

/// Result of a participant joining.
#[derive(Debug, Default)]
pub struct JoinOutcome {
    pub deliveries: Vec<Delivery>,
    /// Previous presenter when a presenter join took the room over.
    pub replaced_presenter: Option<String>,
}

/// Result of a participant leaving.
#[derive(Debug, Default)]
pub struct LeaveOutcome {
    pub deliveries: Vec<Delivery>,
    /// Set when the room was torn down; lists the members that were in it.
    pub ended_members: Option<Vec<String>>,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_room<T>(&self, code: &str, f: impl FnOnce(&mut Room) -> Result<T>) -> Result<T> {
        let mut rooms = self.rooms();
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| SyncError::NotFound(format!("Room {code} not found")))?;
        f(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms().contains_key(code)
    }

    pub fn participant_count(&self, code: &str) -> usize {
        self.rooms().get(code).map_or(0, |r| r.participants.len())
    }

    pub fn is_consistent(&self, code: &str) -> bool {
        self.rooms().get(code).is_none_or(Room::is_consistent)
    }

    /// Add a connection to a room, creating the room on first join.
    pub fn join(
        &self,
        code: &str,
        conn_id: &str,
        name: &str,
        language: &str,
        is_presenter: bool,
        voice_profile: Option<VoiceProfile>,
    ) -> JoinOutcome {
        let mut rooms = self.rooms();
        let room = rooms.entry(code.to_string()).or_insert_with(|| {
            info!(room_code = %code, "Presentation room created");
            Room::default()
        });

        let participant = Participant {
            name: name.to_string(),
            language: language.to_string(),
        };
        room.participants.insert(conn_id.to_string(), participant.clone());

        let mut replaced_presenter = None;
        if is_presenter {
            // One presenter per room: a later presenter join takes over.
            if let Some(previous) = room.presenter.replace(conn_id.to_string()) {
                if previous != conn_id {
                    info!(room_code = %code, %previous, presenter = %conn_id, "Presenter replaced");
                    replaced_presenter = Some(previous);
                }
            }
            if let Some(profile) = voice_profile {
                room.presenter_voice = profile;
            }
        } else if room.presenter.as_deref() == Some(conn_id) {
            room.presenter = None;
        }

        let count = room.participants.len();
        info!(room_code = %code, conn_id, is_presenter, participants = count, "Participant joined");

        let mut deliveries = room.broadcast(&ServerMessage::ParticipantJoined {
            participant: room.info(conn_id, &participant),
            participant_count: count,
        });
        deliveries.push((
            conn_id.to_string(),
            ServerMessage::JoinedPresentation {
                room_code: code.to_string(),
                participant_count: count,
                participants: room.roster(),
            },
        ));
        JoinOutcome {
            deliveries,
            replaced_presenter,
        }
    }

    /// Check that `conn_id` may stream presenter audio and snapshot what the
    /// fan-out needs.
    pub fn presenter_stream(&self, code: &str, conn_id: &str) -> Result<PresenterStream> {
        self.with_room(code, |room| {
            room.require_presenter(conn_id, "send presenter audio")?;
            let source_language = room.require_member(conn_id)?.language.clone();
            Ok(PresenterStream {
                session_id: room_session_id(code),
                target_languages: room.listener_languages(),
                source_language,
                voice_profile: room.presenter_voice.clone(),
            })
        })
    }

    /// Route each listener the translation in their own language. Muted
    /// listeners and the presenter get nothing.
    pub fn distribute(&self, code: &str, result: &FanoutResult) -> Vec<Delivery> {
        let rooms = self.rooms();
        let Some(room) = rooms.get(code) else {
            return Vec::new();
        };

        room.participants
            .iter()
            .filter(|(id, _)| room.presenter.as_deref() != Some(id.as_str()))
            .filter(|(id, _)| !room.muted.contains(*id))
            .filter_map(|(id, p)| {
                let output = result.translations.get(&p.language)?;
                Some((
                    id.clone(),
                    ServerMessage::TranslatedAudio {
                        audio_data: STANDARD.encode(&output.synthesized_audio),
                        source_text: result.source_text.clone(),
                        translated_text: output.translated_text.clone(),
                        language: p.language.clone(),
                        timestamp: result.timestamp,
                    },
                ))
            })
            .collect()
    }

    /// Presenter mutes or unmutes a participant.
    pub fn set_muted(
        &self,
        code: &str,
        presenter: &str,
        participant_id: &str,
        muted: bool,
    ) -> Result<Vec<Delivery>> {
        self.with_room(code, |room| {
            room.require_presenter(presenter, if muted { "mute" } else { "unmute" })?;
            room.require_member(participant_id)?;

            let (to_participant, to_presenter) = if muted {
                room.muted.insert(participant_id.to_string());
                (
                    ServerMessage::Muted { by_presenter: true },
                    ServerMessage::ParticipantMuted {
                        participant_id: participant_id.to_string(),
                    },
                )
            } else {
                room.muted.remove(participant_id);
                (
                    ServerMessage::Unmuted { by_presenter: true },
                    ServerMessage::ParticipantUnmuted {
                        participant_id: participant_id.to_string(),
                    },
                )
            };
            Ok(vec![
                (participant_id.to_string(), to_participant),
                (presenter.to_string(), to_presenter),
            ])
        })
    }

    /// Raise or lower the caller's hand; only the presenter is told.
    pub fn set_hand(&self, code: &str, conn_id: &str, raised: bool) -> Result<Vec<Delivery>> {
        self.with_room(code, |room| {
            let name = room.require_member(conn_id)?.name.clone();
            if raised {
                room.raised_hands.insert(conn_id.to_string());
            } else {
                room.raised_hands.remove(conn_id);
            }

            let Some(presenter) = room.presenter.clone() else {
                return Ok(Vec::new());
            };
            let msg = if raised {
                ServerMessage::HandRaised {
                    participant_id: conn_id.to_string(),
                    participant_name: name,
                }
            } else {
                ServerMessage::HandLowered {
                    participant_id: conn_id.to_string(),
                    participant_name: name,
                }
            };
            Ok(vec![(presenter, msg)])
        })
    }

    /// Presenter gives a participant the floor: unmute and lower their hand.
    pub fn allow_speak(
        &self,
        code: &str,
        presenter: &str,
        participant_id: &str,
    ) -> Result<Vec<Delivery>> {
        self.with_room(code, |room| {
            room.require_presenter(presenter, "allow participants to speak")?;
            room.require_member(participant_id)?;
            room.muted.remove(participant_id);
            room.raised_hands.remove(participant_id);
            Ok(vec![(
                participant_id.to_string(),
                ServerMessage::AllowedToSpeak { by_presenter: true },
            )])
        })
    }

    pub fn update_language(
        &self,
        code: &str,
        conn_id: &str,
        language: &str,
    ) -> Result<Vec<Delivery>> {
        self.with_room(code, |room| {
            let participant = room
                .participants
                .get_mut(conn_id)
                .ok_or_else(|| SyncError::NotFound(format!("Participant {conn_id} not in room")))?;
            participant.language = language.to_string();
            Ok(room.broadcast(&ServerMessage::ParticipantLanguageUpdated {
                participant_id: conn_id.to_string(),
                language: language.to_string(),
            }))
        })
    }

    /// Presenter ends the presentation. Returns the deliveries and the
    /// members that were in the room.
    pub fn end(&self, code: &str, conn_id: &str) -> Result<(Vec<Delivery>, Vec<String>)> {
        let mut rooms = self.rooms();
        let room = rooms
            .get(code)
            .ok_or_else(|| SyncError::NotFound(format!("Room {code} not found")))?;
        room.require_presenter(conn_id, "end the presentation")?;

        let (deliveries, members) = teardown(&mut rooms, code, "presenter");
        Ok((deliveries, members))
    }

    /// Remove a connection from a room. A departing presenter ends it.
    pub fn leave(&self, code: &str, conn_id: &str) -> LeaveOutcome {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get_mut(code) else {
            return LeaveOutcome::default();
        };
        if !room.participants.contains_key(conn_id) {
            return LeaveOutcome::default();
        }

        if room.presenter.as_deref() == Some(conn_id) {
            room.participants.remove(conn_id);
            let (deliveries, members) = teardown(&mut rooms, code, "presenter_disconnect");
            return LeaveOutcome {
                deliveries,
                ended_members: Some(members),
            };
        }

        room.participants.remove(conn_id);
        room.muted.remove(conn_id);
        room.raised_hands.remove(conn_id);
        let count = room.participants.len();
        info!(room_code = %code, conn_id, participants = count, "Participant left");

        if count == 0 {
            rooms.remove(code);
            info!(room_code = %code, "Empty presentation room removed");
            return LeaveOutcome::default();
        }

        LeaveOutcome {
            deliveries: room.broadcast(&ServerMessage::ParticipantLeft {
                participant_id: conn_id.to_string(),
                participant_count: count,
            }),
            ended_members: None,
        }
    }
}

/// Drop a room, notifying everyone still in it.
fn teardown(
    rooms: &mut HashMap<String, Room>,
    code: &str,
    ended_by: &str,
) -> (Vec<Delivery>, Vec<String>) {
    let Some(room) = rooms.remove(code) else {
        return (Vec::new(), Vec::new());
    };
    let deliveries = room.broadcast(&ServerMessage::PresentationEnded {
        ended_by: ended_by.to_string(),
    });
    let members = room.participants.keys().cloned().collect();
    info!(room_code = %code, ended_by, "Presentation ended");
    (deliveries, members)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use vidlisync_core::types::LanguageOutput;

    use super::*;

    fn recipients(deliveries: &[Delivery], kind: &str) -> Vec<String> {
        let mut ids: Vec<_> = deliveries
            .iter()
            .filter(|(_, m)| serde_json::to_value(m).unwrap()["type"] == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn room_with_listeners() -> RoomRegistry {
        let rooms = RoomRegistry::new();
        rooms.join("R1", "p", "Presenter", "en", true, None);
        rooms.join("R1", "a", "Ana", "es", false, None);
        rooms.join("R1", "b", "Bruno", "fr", false, None);
        rooms.join("R1", "c", "Carla", "es", false, None);
        rooms
    }

    #[test]
    fn test_join_creates_room_and_notifies() {
        let rooms = RoomRegistry::new();
        let d = rooms.join("ABC", "p", "Presenter", "en", true, None).deliveries;
        assert!(rooms.contains("ABC"));
        assert_eq!(recipients(&d, "participant_joined"), vec!["p"]);
        assert_eq!(recipients(&d, "joined_presentation"), vec!["p"]);

        let d = rooms.join("ABC", "a", "Ana", "es", false, None).deliveries;
        assert_eq!(recipients(&d, "participant_joined"), vec!["a", "p"]);
        let (_, joined) = d.last().unwrap();
        match joined {
            ServerMessage::JoinedPresentation {
                participant_count,
                participants,
                ..
            } => {
                assert_eq!(*participant_count, 2);
                assert!(participants.iter().any(|p| p.connection_id == "p" && p.is_presenter));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rooms.is_consistent("ABC"));
    }

    #[test]
    fn test_listener_languages_and_presenter_stream() {
        let rooms = room_with_listeners();
        let stream = rooms.presenter_stream("R1", "p").unwrap();
        assert_eq!(stream.target_languages, vec!["es", "fr"]);
        assert_eq!(stream.source_language, "en");
        assert_eq!(stream.session_id, "presenter_R1");

        let err = rooms.presenter_stream("R1", "a").unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    fn utterance() -> FanoutResult {
        let mut translations = BTreeMap::new();
        for (lang, text) in [("es", "hola"), ("fr", "bonjour"), ("en", "hello")] {
            translations.insert(
                lang.to_string(),
                LanguageOutput {
                    translated_text: text.into(),
                    optimized_text: format!("{text}."),
                    synthesized_audio: vec![1, 2],
                    translation_confidence: 0.9,
                    time_ms: 1.0,
                },
            );
        }
        FanoutResult {
            success: true,
            source_text: Some("hello".into()),
            detected_language: Some("en".into()),
            translations,
            stt_time_ms: 1.0,
            total_time_ms: 2.0,
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }

    #[test]
    fn test_distribute_skips_muted_and_presenter() {
        let rooms = room_with_listeners();
        rooms.set_muted("R1", "p", "c", true).unwrap();

        let d = rooms.distribute("R1", &utterance());
        assert_eq!(recipients(&d, "translated_audio"), vec!["a", "b"]);
        for (id, msg) in &d {
            if let ServerMessage::TranslatedAudio { language, translated_text, .. } = msg {
                match id.as_str() {
                    "a" => assert_eq!((language.as_str(), translated_text.as_str()), ("es", "hola")),
                    "b" => assert_eq!((language.as_str(), translated_text.as_str()), ("fr", "bonjour")),
                    other => panic!("unexpected recipient {other}"),
                }
            }
        }
    }

    #[test]
    fn test_presenter_only_actions() {
        let rooms = room_with_listeners();
        assert_eq!(
            rooms.set_muted("R1", "a", "b", true).unwrap_err().code(),
            "unauthorized"
        );
        assert_eq!(rooms.end("R1", "b").unwrap_err().code(), "unauthorized");
        assert_eq!(
            rooms.allow_speak("R1", "a", "b").unwrap_err().code(),
            "unauthorized"
        );
        assert_eq!(
            rooms.set_muted("R1", "p", "zzz", true).unwrap_err().code(),
            "not_found"
        );
    }

    #[test]
    fn test_mute_raise_and_allow_speak() {
        let rooms = room_with_listeners();
        let d = rooms.set_muted("R1", "p", "a", true).unwrap();
        assert_eq!(recipients(&d, "muted"), vec!["a"]);
        assert_eq!(recipients(&d, "participant_muted"), vec!["p"]);

        let d = rooms.set_hand("R1", "a", true).unwrap();
        assert_eq!(recipients(&d, "hand_raised"), vec!["p"]);

        let d = rooms.allow_speak("R1", "p", "a").unwrap();
        assert_eq!(recipients(&d, "allowed_to_speak"), vec!["a"]);
        let roster = {
            let rooms_guard = rooms.rooms();
            rooms_guard["R1"].roster()
        };
        let a = roster.iter().find(|p| p.connection_id == "a").unwrap();
        assert!(!a.is_muted);
        assert!(!a.has_raised_hand);

        let d = rooms.set_hand("R1", "b", false).unwrap();
        assert_eq!(recipients(&d, "hand_lowered"), vec!["p"]);
    }

    #[test]
    fn test_update_language_broadcasts() {
        let rooms = room_with_listeners();
        let d = rooms.update_language("R1", "b", "de").unwrap();
        assert_eq!(recipients(&d, "participant_language_updated"), vec!["a", "b", "c", "p"]);
        assert_eq!(
            rooms.presenter_stream("R1", "p").unwrap().target_languages,
            vec!["de", "es"]
        );
    }

    #[test]
    fn test_end_presentation_is_terminal() {
        let rooms = room_with_listeners();
        let (d, members) = rooms.end("R1", "p").unwrap();
        assert_eq!(recipients(&d, "presentation_ended"), vec!["a", "b", "c", "p"]);
        assert_eq!(members.len(), 4);
        assert!(!rooms.contains("R1"));
        assert_eq!(rooms.set_hand("R1", "a", true).unwrap_err().code(), "not_found");
        assert_eq!(rooms.presenter_stream("R1", "p").unwrap_err().code(), "not_found");
        assert!(rooms.distribute("R1", &utterance()).is_empty());

        // A fresh room on the next join
        rooms.join("R1", "x", "Xavi", "it", false, None);
        assert_eq!(rooms.participant_count("R1"), 1);
    }

    #[test]
    fn test_leave_keeps_sets_consistent() {
        let rooms = room_with_listeners();
        rooms.set_muted("R1", "p", "a", true).unwrap();
        rooms.set_hand("R1", "a", true).unwrap();

        let out = rooms.leave("R1", "a");
        assert!(out.ended_members.is_none());
        assert_eq!(recipients(&out.deliveries, "participant_left"), vec!["b", "c", "p"]);
        assert!(rooms.is_consistent("R1"));
        assert_eq!(rooms.participant_count("R1"), 3);
    }

    #[test]
    fn test_presenter_leave_ends_room() {
        let rooms = room_with_listeners();
        let out = rooms.leave("R1", "p");
        let members = out.ended_members.expect("room ended");
        assert_eq!(members.len(), 3);
        assert_eq!(recipients(&out.deliveries, "presentation_ended"), vec!["a", "b", "c"]);
        match &out.deliveries[0].1 {
            ServerMessage::PresentationEnded { ended_by } => assert_eq!(ended_by, "presenter_disconnect"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!rooms.contains("R1"));
    }

    #[test]
    fn test_presenter_overwrite_on_rejoin() {
        let rooms = room_with_listeners();
        let out = rooms.join("R1", "q", "Second", "en", true, None);
        assert_eq!(out.replaced_presenter.as_deref(), Some("p"));
        assert_eq!(recipients(&out.deliveries, "joined_presentation"), vec!["q"]);
        assert!(rooms.presenter_stream("R1", "q").is_ok());
        assert!(rooms.presenter_stream("R1", "p").is_err());
        assert!(rooms.is_consistent("R1"));
    }

    #[test]
    fn test_presenter_rejoin_is_not_a_replacement() {
        let rooms = room_with_listeners();
        let out = rooms.join("R1", "p", "Presenter", "en", true, None);
        assert!(out.replaced_presenter.is_none());
        assert_eq!(rooms.participant_count("R1"), 4);
    }
}
