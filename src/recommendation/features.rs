//! Target audio-feature vector and channel rating helpers.
//!
//! A track's weight is `(log2(plays + 1) + 1) * ((rating + 4) / 8 + 1) * decay^days`
//! when the listener has interacted with it, and `1` otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap};

use crate::storage::{Interaction, TrackRecord, UserRecord};

/// Mínimo de tracks con audio features para calcular targets
pub const MIN_FEATURE_TRACKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Acousticness,
    Danceability,
    Energy,
    Instrumentalness,
    Liveness,
    Popularity,
    Speechiness,
    Tempo,
    Valence,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::Acousticness,
        Feature::Danceability,
        Feature::Energy,
        Feature::Instrumentalness,
        Feature::Liveness,
        Feature::Popularity,
        Feature::Speechiness,
        Feature::Tempo,
        Feature::Valence,
    ];

    /// Nombre del parámetro `target_*` de la API
    pub fn param(self) -> &'static str {
        match self {
            Self::Acousticness => "target_acousticness",
            Self::Danceability => "target_danceability",
            Self::Energy => "target_energy",
            Self::Instrumentalness => "target_instrumentalness",
            Self::Liveness => "target_liveness",
            Self::Popularity => "target_popularity",
            Self::Speechiness => "target_speechiness",
            Self::Tempo => "target_tempo",
            Self::Valence => "target_valence",
        }
    }

    fn of(self, track: &TrackRecord) -> Option<f64> {
        let f = &track.features;
        match self {
            Self::Acousticness => f.acousticness,
            Self::Danceability => f.danceability,
            Self::Energy => f.energy,
            Self::Instrumentalness => f.instrumentalness,
            Self::Liveness => f.liveness,
            Self::Popularity => track.popularity,
            Self::Speechiness => f.speechiness,
            Self::Tempo => f.tempo,
            Self::Valence => f.valence,
        }
    }

    /// El tempo no se acota
    pub fn clamp(self, value: f64) -> f64 {
        match self {
            Self::Popularity => value.clamp(0.0, 100.0),
            Self::Tempo => value,
            _ => value.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetFeatures {
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub liveness: Option<f64>,
    pub popularity: Option<f64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub valence: Option<f64>,
}

impl TargetFeatures {
    pub fn get(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::Acousticness => self.acousticness,
            Feature::Danceability => self.danceability,
            Feature::Energy => self.energy,
            Feature::Instrumentalness => self.instrumentalness,
            Feature::Liveness => self.liveness,
            Feature::Popularity => self.popularity,
            Feature::Speechiness => self.speechiness,
            Feature::Tempo => self.tempo,
            Feature::Valence => self.valence,
        }
    }

    fn set(&mut self, feature: Feature, value: f64) {
        let slot = match feature {
            Feature::Acousticness => &mut self.acousticness,
            Feature::Danceability => &mut self.danceability,
            Feature::Energy => &mut self.energy,
            Feature::Instrumentalness => &mut self.instrumentalness,
            Feature::Liveness => &mut self.liveness,
            Feature::Popularity => &mut self.popularity,
            Feature::Speechiness => &mut self.speechiness,
            Feature::Tempo => &mut self.tempo,
            Feature::Valence => &mut self.valence,
        };
        *slot = Some(value);
    }

    /// Pares `(target_*, valor)` para la query string
    pub fn params(&self) -> Vec<(&'static str, f64)> {
        Feature::ALL
            .iter()
            .filter_map(|f| self.get(*f).map(|v| (f.param(), v)))
            .collect()
    }
}

/// Interacción agregada (de un usuario o promediada sobre el canal)
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedInteraction {
    pub play_count: i64,
    pub rating: f64,
    pub last_interaction: DateTime<Utc>,
}

impl From<&Interaction> for WeightedInteraction {
    fn from(interaction: &Interaction) -> Self {
        Self {
            play_count: interaction.play_count,
            rating: interaction.rating as f64,
            last_interaction: interaction.last_interaction,
        }
    }
}

impl WeightedInteraction {
    pub fn weight(&self, decay: f64, now: DateTime<Utc>) -> f64 {
        let plays = (self.play_count.max(0) as f64 + 1.0).log2();
        let rating = (self.rating + 4.0) / 8.0;
        let days = (now - self.last_interaction).num_days().max(0);
        let days = i32::try_from(days).unwrap_or(i32::MAX);
        (plays + 1.0) * (rating + 1.0) * decay.powi(days)
    }
}

pub fn personal_interactions(user: &UserRecord) -> HashMap<String, WeightedInteraction> {
    user.track_ratings
        .iter()
        .map(|r| (r.id.clone(), WeightedInteraction::from(r)))
        .collect()
}

/// Promedio de las interacciones de los miembros del canal, por track.
///
/// Las reproducciones se suman, el rating se promedia entre los miembros que
/// tienen interacción con el track y gana la fecha más reciente.
pub fn channel_average(users: &[UserRecord]) -> HashMap<String, WeightedInteraction> {
    let mut grouped: HashMap<String, (WeightedInteraction, usize)> = HashMap::new();

    for interaction in users.iter().flat_map(|u| u.track_ratings.iter()) {
        grouped
            .entry(interaction.id.clone())
            .and_modify(|(acc, members)| {
                acc.play_count += interaction.play_count;
                acc.rating += interaction.rating as f64;
                acc.last_interaction = acc.last_interaction.max(interaction.last_interaction);
                *members += 1;
            })
            .or_insert_with(|| (WeightedInteraction::from(interaction), 1));
    }

    grouped
        .into_iter()
        .map(|(id, (mut acc, members))| {
            acc.rating /= members as f64;
            (id, acc)
        })
        .collect()
}

/// Promedio ponderado de las features de `tracks`.
///
/// `None` si menos de [`MIN_FEATURE_TRACKS`] tracks traen audio features.
/// Cada valor se acota a su rango válido.
pub fn target_features(
    tracks: &[TrackRecord],
    interactions: &HashMap<String, WeightedInteraction>,
    decay: f64,
    now: DateTime<Utc>,
) -> Option<TargetFeatures> {
    let featured: Vec<&TrackRecord> = tracks.iter().filter(|t| t.features_exist()).collect();
    if featured.len() < MIN_FEATURE_TRACKS {
        return None;
    }

    let weights: Vec<f64> = featured
        .iter()
        .map(|track| {
            interactions
                .get(&track.id)
                .map_or(1.0, |interaction| interaction.weight(decay, now))
        })
        .collect();

    let mut targets = TargetFeatures::default();
    for feature in Feature::ALL {
        let (sum, total) = featured
            .iter()
            .zip(&weights)
            .filter_map(|(track, weight)| feature.of(track).map(|v| (v * weight, *weight)))
            .fold((0.0, 0.0), |(s, t), (v, w)| (s + v, t + w));

        if total > 0.0 {
            targets.set(feature, feature.clamp(sum / total));
        }
    }

    Some(targets)
}

/// Ordena ids por rating promedio del canal, de mayor a menor; sin rating van al final
pub fn sort_by_channel_rating(ids: &mut [String], channel: &HashMap<String, WeightedInteraction>) {
    ids.sort_by(|a, b| {
        match (channel.get(a), channel.get(b)) {
            (Some(a), Some(b)) => b.rating.partial_cmp(&a.rating).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}
