//! MovieLens ranking dataset.
//!
//! Loads the MovieLens 1M `.dat` files (`users.dat`, `movies.dat`,
//! `ratings.dat`, `::`-separated) and turns each rating into a binary
//! ranking example: the label is `1.0` when the rating is at least
//! [`POSITIVE_RATING`].
//!
//! Each example carries the fields `user_id`, `user_gender`, `user_age`,
//! `user_occupation`, `movie_id` and `movie_genres`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use deeprec_core::feature::Features;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::LabeledExample;
use crate::error::{DataError, DataResult};
use crate::input::DatasetInput;

/// Ratings at or above this value are positive examples.
pub const POSITIVE_RATING: u8 = 4;

/// Fraction of ratings assigned to the training split.
pub const TRAIN_FRACTION: f64 = 0.8;

/// Seed for the train/test split and training shuffle.
pub const DEFAULT_SEED: u64 = 42;

const GENDER_VOCAB: [&str; 2] = ["F", "M"];
const AGE_VOCAB: [i64; 7] = [1, 18, 25, 35, 45, 50, 56];
const NUM_OCCUPATIONS: i64 = 21;
const GENRES_VOCAB: [&str; 18] = [
    "Action",
    "Adventure",
    "Animation",
    "Children's",
    "Comedy",
    "Crime",
    "Documentary",
    "Drama",
    "Fantasy",
    "Film-Noir",
    "Horror",
    "Musical",
    "Mystery",
    "Romance",
    "Sci-Fi",
    "Thriller",
    "War",
    "Western",
];

/// Demographics from `users.dat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// 1-based user id.
    pub id: i64,
    /// `F` or `M`.
    pub gender: String,
    /// Age bracket, one of the age vocabulary values.
    pub age: i64,
    /// Occupation code in `0..=20`.
    pub occupation: i64,
}

/// A row of `movies.dat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    /// 1-based movie id.
    pub id: i64,
    /// Title including the release year.
    pub title: String,
    /// Pipe-separated genres, split.
    pub genres: Vec<String>,
}

/// A row of `ratings.dat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    /// User id.
    pub user_id: i64,
    /// Movie id.
    pub movie_id: i64,
    /// Stars, 1 to 5.
    pub rating: u8,
    /// Seconds since the epoch.
    pub timestamp: i64,
}

/// The ranking dataset: vocabularies, cardinalities, and a train/test split.
#[derive(Debug, Clone)]
pub struct MovielensRanking {
    num_users: usize,
    num_movies: usize,
    train: Arc<Vec<LabeledExample>>,
    test: Arc<Vec<LabeledExample>>,
    seed: u64,
}

impl MovielensRanking {
    /// Loads `users.dat`, `movies.dat` and `ratings.dat` from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> DataResult<Self> {
        let dir = dir.as_ref();
        let users = parse_lines(&dir.join("users.dat"), parse_user)?;
        let movies = parse_lines(&dir.join("movies.dat"), parse_movie)?;
        let ratings = parse_lines(&dir.join("ratings.dat"), parse_rating)?;
        info!(
            dir = %dir.display(),
            users = users.len(),
            movies = movies.len(),
            ratings = ratings.len(),
            "Loaded MovieLens files"
        );
        Self::from_parts(users, movies, ratings, DEFAULT_SEED)
    }

    /// Builds the dataset from parsed rows. Ratings that reference an
    /// unknown user or movie are dropped.
    pub fn from_parts(
        users: Vec<User>,
        movies: Vec<Movie>,
        ratings: Vec<Rating>,
        seed: u64,
    ) -> DataResult<Self> {
        let num_users = users.iter().map(|u| u.id).max().unwrap_or(0).max(0) as usize;
        let num_movies = movies.iter().map(|m| m.id).max().unwrap_or(0).max(0) as usize;
        if num_users == 0 || num_movies == 0 {
            return Err(DataError::InvalidConfig(
                "dataset needs at least one user and one movie".into(),
            ));
        }

        let users: HashMap<i64, User> = users.into_iter().map(|u| (u.id, u)).collect();
        let movies: HashMap<i64, Movie> = movies.into_iter().map(|m| (m.id, m)).collect();

        let total = ratings.len();
        let mut examples: Vec<LabeledExample> = ratings
            .iter()
            .filter_map(|r| {
                let user = users.get(&r.user_id)?;
                let movie = movies.get(&r.movie_id)?;
                Some(to_example(user, movie, r))
            })
            .collect();
        if examples.len() < total {
            tracing::warn!(
                dropped = total - examples.len(),
                "Dropped ratings with unknown user or movie"
            );
        }

        if examples.len() < 2 {
            return Err(DataError::InvalidConfig(format!(
                "need at least 2 ratings with known user and movie for a train/test split, got {}",
                examples.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        examples.shuffle(&mut rng);
        // Both splits keep at least one example.
        let split = ((examples.len() as f64 * TRAIN_FRACTION).round() as usize)
            .clamp(1, examples.len() - 1);
        let test = examples.split_off(split);

        info!(
            num_users,
            num_movies,
            train = examples.len(),
            test = test.len(),
            "Built MovieLens ranking split"
        );
        Ok(Self {
            num_users,
            num_movies,
            train: Arc::new(examples),
            test: Arc::new(test),
            seed,
        })
    }

    /// Generates a deterministic dataset with learnable structure.
    ///
    /// Every user prefers a few genres; a rating is high when the movie
    /// matches one of them, with gender/age effects and noise on top.
    pub fn synthetic(
        num_users: usize,
        num_movies: usize,
        num_ratings: usize,
        seed: u64,
    ) -> DataResult<Self> {
        if num_users == 0 || num_movies == 0 {
            return Err(DataError::InvalidConfig(
                "synthetic data needs at least one user and one movie".into(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);

        let users: Vec<User> = (1..=num_users as i64)
            .map(|id| User {
                id,
                gender: GENDER_VOCAB[rng.gen_range(0..GENDER_VOCAB.len())].to_string(),
                age: AGE_VOCAB[rng.gen_range(0..AGE_VOCAB.len())],
                occupation: rng.gen_range(0..NUM_OCCUPATIONS),
            })
            .collect();
        let preferences: Vec<[usize; 2]> = (0..num_users)
            .map(|_| {
                [
                    rng.gen_range(0..GENRES_VOCAB.len()),
                    rng.gen_range(0..GENRES_VOCAB.len()),
                ]
            })
            .collect();

        let movies: Vec<Movie> = (1..=num_movies as i64)
            .map(|id| {
                let count = rng.gen_range(1..=3);
                let mut genres: Vec<String> = (0..count)
                    .map(|_| GENRES_VOCAB[rng.gen_range(0..GENRES_VOCAB.len())].to_string())
                    .collect();
                genres.sort();
                genres.dedup();
                Movie {
                    id,
                    title: format!("Movie {id} (2000)"),
                    genres,
                }
            })
            .collect();

        let ratings: Vec<Rating> = (0..num_ratings)
            .map(|i| {
                let u = rng.gen_range(0..num_users);
                let m = rng.gen_range(0..num_movies);
                let user = &users[u];
                let movie = &movies[m];
                let liked = preferences[u]
                    .iter()
                    .any(|&g| movie.genres.iter().any(|mg| mg == GENRES_VOCAB[g]));
                let mut score: f64 = if liked { 4.2 } else { 2.4 };
                if user.gender == "F" && movie.genres.iter().any(|g| g == "Romance") {
                    score += 0.6;
                }
                if user.age <= 18 && movie.genres.iter().any(|g| g == "Animation") {
                    score += 0.6;
                }
                score += rng.gen_range(-1.0..1.0);
                Rating {
                    user_id: user.id,
                    movie_id: movie.id,
                    rating: score.round().clamp(1.0, 5.0) as u8,
                    timestamp: 978_300_000 + i as i64,
                }
            })
            .collect();

        Self::from_parts(users, movies, ratings, seed)
    }

    /// Number of user id buckets.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of movie id buckets.
    pub fn num_movies(&self) -> usize {
        self.num_movies
    }

    /// Gender vocabulary.
    pub fn gender_vocab(&self) -> Vec<String> {
        GENDER_VOCAB.iter().map(|s| s.to_string()).collect()
    }

    /// Age bracket vocabulary.
    pub fn age_vocab(&self) -> Vec<i64> {
        AGE_VOCAB.to_vec()
    }

    /// Occupation code vocabulary, `0..=20`.
    pub fn occupation_vocab(&self) -> Vec<i64> {
        (0..NUM_OCCUPATIONS).collect()
    }

    /// Genre vocabulary.
    pub fn genres_vocab(&self) -> Vec<String> {
        GENRES_VOCAB.iter().map(|s| s.to_string()).collect()
    }

    /// Training examples.
    pub fn train(&self) -> &[LabeledExample] {
        &self.train
    }

    /// Testing examples.
    pub fn test(&self) -> &[LabeledExample] {
        &self.test
    }

    /// Endless, reshuffled batches of the training split.
    pub fn training_input_fn(&self, batch_size: usize) -> DatasetInput {
        DatasetInput::repeated(Arc::clone(&self.train), batch_size, self.seed)
    }

    /// One ordered pass over the testing split.
    pub fn testing_input_fn(&self, batch_size: usize) -> DatasetInput {
        DatasetInput::once(Arc::clone(&self.test), batch_size)
    }
}

fn to_example(user: &User, movie: &Movie, rating: &Rating) -> LabeledExample {
    let features = Features::new()
        .with("user_id", user.id)
        .with("user_gender", user.gender.as_str())
        .with("user_age", user.age)
        .with("user_occupation", user.occupation)
        .with("movie_id", movie.id)
        .with("movie_genres", movie.genres.clone());
    let label = if rating.rating >= POSITIVE_RATING {
        1.0
    } else {
        0.0
    };
    LabeledExample::new(features, label)
}

fn parse_lines<T>(
    path: &Path,
    parse: fn(&[&str]) -> Result<T, String>,
) -> DataResult<Vec<T>> {
    let bytes = fs::read(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    // Titles in movies.dat are Latin-1.
    let text = String::from_utf8_lossy(&bytes);
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split("::").collect();
        let row = parse(&fields).map_err(|message| DataError::Parse {
            file: file.clone(),
            line: i + 1,
            message,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn expect_fields(fields: &[&str], n: usize) -> Result<(), String> {
    if fields.len() != n {
        return Err(format!("expected {n} fields, got {}", fields.len()));
    }
    Ok(())
}

fn int(field: &str, name: &str) -> Result<i64, String> {
    field
        .trim()
        .parse()
        .map_err(|e| format!("invalid {name} '{field}': {e}"))
}

fn parse_user(fields: &[&str]) -> Result<User, String> {
    // UserID::Gender::Age::Occupation::Zip-code
    expect_fields(fields, 5)?;
    Ok(User {
        id: int(fields[0], "user id")?,
        gender: fields[1].trim().to_string(),
        age: int(fields[2], "age")?,
        occupation: int(fields[3], "occupation")?,
    })
}

fn parse_movie(fields: &[&str]) -> Result<Movie, String> {
    // MovieID::Title::Genres
    expect_fields(fields, 3)?;
    Ok(Movie {
        id: int(fields[0], "movie id")?,
        title: fields[1].to_string(),
        genres: fields[2]
            .split('|')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

fn parse_rating(fields: &[&str]) -> Result<Rating, String> {
    // UserID::MovieID::Rating::Timestamp
    expect_fields(fields, 4)?;
    let rating = int(fields[2], "rating")?;
    if !(1..=5).contains(&rating) {
        return Err(format!("rating {rating} outside 1..=5"));
    }
    Ok(Rating {
        user_id: int(fields[0], "user id")?,
        movie_id: int(fields[1], "movie id")?,
        rating: rating as u8,
        timestamp: int(fields[3], "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputFn;
    use deeprec_core::FeatureValue;
    use std::io::Write;

    fn write_files(dir: &Path) {
        let mut users = fs::File::create(dir.join("users.dat")).unwrap();
        writeln!(users, "1::F::1::10::48067").unwrap();
        writeln!(users, "2::M::56::16::70072").unwrap();

        let mut movies = fs::File::create(dir.join("movies.dat")).unwrap();
        writeln!(movies, "1::Toy Story (1995)::Animation|Children's|Comedy").unwrap();
        movies.write_all(b"2::Caf\xe9 (1999)::Drama\n").unwrap();

        let mut ratings = fs::File::create(dir.join("ratings.dat")).unwrap();
        for (u, m, r) in [(1, 1, 5), (1, 2, 3), (2, 1, 4), (2, 2, 1), (2, 9, 5)] {
            writeln!(ratings, "{u}::{m}::{r}::978300760").unwrap();
        }
    }

    #[test]
    fn test_load_dat_files() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path());

        let data = MovielensRanking::load(dir.path()).unwrap();
        assert_eq!(data.num_users(), 2);
        assert_eq!(data.num_movies(), 2);
        // rating for unknown movie 9 is dropped
        assert_eq!(data.train().len() + data.test().len(), 4);

        let positives = data
            .train()
            .iter()
            .chain(data.test())
            .filter(|e| e.label == 1.0)
            .count();
        assert_eq!(positives, 2);
    }

    #[test]
    fn test_tiny_datasets_keep_both_splits() {
        let data = MovielensRanking::synthetic(2, 2, 2, 1).unwrap();
        assert_eq!(data.train().len(), 1);
        assert_eq!(data.test().len(), 1);

        let data = MovielensRanking::synthetic(2, 2, 3, 1).unwrap();
        assert_eq!(data.train().len(), 2);
        assert_eq!(data.test().len(), 1);

        let err = MovielensRanking::synthetic(2, 2, 1, 1).unwrap_err();
        assert!(matches!(err, DataError::InvalidConfig(_)));
        assert!(err.to_string().contains("at least 2 ratings"));
    }

    #[test]
    fn test_example_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path());
        let data = MovielensRanking::load(dir.path()).unwrap();

        let example = data
            .train()
            .iter()
            .chain(data.test())
            .find(|e| e.features.get("movie_id") == Some(&FeatureValue::Int(1)))
            .unwrap();
        assert!(matches!(
            example.features.get("movie_genres"),
            Some(FeatureValue::StrList(g)) if g.len() == 3
        ));
        for key in [
            "user_id",
            "user_gender",
            "user_age",
            "user_occupation",
            "movie_id",
            "movie_genres",
        ] {
            assert!(example.features.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MovielensRanking::load(dir.path()),
            Err(DataError::Io { .. })
        ));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path());
        fs::write(dir.path().join("ratings.dat"), "1::1::5::1\n1::2::x::2\n").unwrap();
        match MovielensRanking::load(dir.path()) {
            Err(DataError::Parse { file, line, .. }) => {
                assert_eq!(file, "ratings.dat");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_vocabularies() {
        let data = MovielensRanking::synthetic(20, 30, 100, 1).unwrap();
        assert_eq!(data.gender_vocab(), vec!["F", "M"]);
        assert_eq!(data.age_vocab(), vec![1, 18, 25, 35, 45, 50, 56]);
        assert_eq!(data.occupation_vocab().len(), 21);
        assert_eq!(data.genres_vocab().len(), 18);
    }

    #[test]
    fn test_synthetic_split_and_determinism() {
        let a = MovielensRanking::synthetic(50, 40, 1000, 7).unwrap();
        let b = MovielensRanking::synthetic(50, 40, 1000, 7).unwrap();
        assert_eq!(a.train().len(), 800);
        assert_eq!(a.test().len(), 200);
        assert_eq!(a.train(), b.train());
        assert_eq!(a.num_users(), 50);
        assert_eq!(a.num_movies(), 40);

        let positives = a.train().iter().filter(|e| e.label == 1.0).count();
        assert!(positives > 100 && positives < 700);
    }

    #[test]
    fn test_input_fns() {
        let data = MovielensRanking::synthetic(10, 10, 100, 3).unwrap();
        let test_batches: Vec<_> = data.testing_input_fn(8).batches().unwrap().collect();
        assert_eq!(test_batches.iter().map(|b| b.len()).sum::<usize>(), 20);

        let train = data.training_input_fn(32).batches().unwrap().take(10).count();
        assert_eq!(train, 10);
    }
}
