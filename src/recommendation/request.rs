use serde::{Deserialize, Serialize};

use super::features::TargetFeatures;

/// Máximo de entidades semilla que acepta el endpoint de recomendaciones
pub const MAX_SEEDS: usize = 5;

/// Entrada normalizada del motor de recomendaciones
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub limit: usize,
    pub seed_tracks: Vec<String>,
    pub seed_artists: Vec<String>,
    pub seed_genres: Vec<String>,
    pub targets: Option<TargetFeatures>,
}

impl RecommendationRequest {
    /// Arma la solicitud recortando cada lista de semillas a [`MAX_SEEDS`]
    pub fn new(
        limit: usize,
        mut seed_tracks: Vec<String>,
        mut seed_artists: Vec<String>,
        mut seed_genres: Vec<String>,
        targets: Option<TargetFeatures>,
    ) -> Self {
        seed_tracks.truncate(MAX_SEEDS);
        seed_artists.truncate(MAX_SEEDS);
        seed_genres.truncate(MAX_SEEDS);
        Self {
            limit,
            seed_tracks,
            seed_artists,
            seed_genres,
            targets,
        }
    }

    pub fn seed_count(&self) -> usize {
        self.seed_tracks.len() + self.seed_artists.len() + self.seed_genres.len()
    }

    pub fn has_entity_seeds(&self) -> bool {
        !self.seed_tracks.is_empty() || !self.seed_artists.is_empty()
    }

    /// Reduce la semilla a [`MAX_SEEDS`] entidades en total.
    ///
    /// Se toman por turnos de tracks, artistas y géneros; toda lista no vacía
    /// conserva al menos su primera entrada.
    pub fn fit_seed_budget(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        let sources = [&self.seed_tracks, &self.seed_artists, &self.seed_genres];
        let mut picked: [Vec<&str>; 3] = Default::default();
        let mut total = 0;

        'rounds: for round in 0..MAX_SEEDS {
            for (source, target) in sources.iter().zip(picked.iter_mut()) {
                if total == MAX_SEEDS {
                    break 'rounds;
                }
                if let Some(seed) = source.get(round) {
                    target.push(seed.as_str());
                    total += 1;
                }
            }
        }

        let [tracks, artists, genres] = picked;
        (tracks, artists, genres)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn new_truncates_each_list() {
        let request = RecommendationRequest::new(3, ids("t", 9), ids("a", 6), ids("g", 5), None);
        assert_eq!(request.seed_tracks.len(), 5);
        assert_eq!(request.seed_artists.len(), 5);
        assert_eq!(request.seed_genres.len(), 5);
        assert_eq!(request.seed_count(), 15);
    }

    #[test]
    fn seed_budget_is_shared_round_robin() {
        let request = RecommendationRequest::new(3, ids("t", 5), ids("a", 5), ids("g", 1), None);
        let (tracks, artists, genres) = request.fit_seed_budget();
        assert_eq!(tracks, vec!["t0", "t1"]);
        assert_eq!(artists, vec!["a0", "a1"]);
        assert_eq!(genres, vec!["g0"]);
    }

    #[test]
    fn seed_budget_never_exceeds_five() {
        let request = RecommendationRequest::new(3, ids("t", 5), ids("a", 5), ids("g", 5), None);
        let (tracks, artists, genres) = request.fit_seed_budget();
        assert_eq!(tracks.len() + artists.len() + genres.len(), MAX_SEEDS);
        assert_eq!(tracks, vec!["t0", "t1"]);
        assert_eq!(artists, vec!["a0", "a1"]);
        assert_eq!(genres, vec!["g0"]);
    }

    #[test]
    fn seed_budget_uses_single_list_fully() {
        let request = RecommendationRequest::new(3, ids("t", 5), vec![], vec![], None);
        let (tracks, artists, genres) = request.fit_seed_budget();
        assert_eq!(tracks.len(), 5);
        assert!(artists.is_empty() && genres.is_empty());
    }
}
