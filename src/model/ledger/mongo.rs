use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc,
    error::{Error as DbError, ErrorKind, WriteFailure},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use rocket::futures::TryStreamExt;

use super::{StoreError, VoteRecord, VoteStore};
use crate::model::nullifier::Nullifier;

/// Server error code for a unique index violation; the driver exports no constant for it.
const DUPLICATE_KEY: i32 = 11000;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

impl MongoCollection for VoteRecord {
    const NAME: &'static str = "votes";
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let votes = Coll::<VoteRecord>::from_db(db);

    // The double-vote constraint.
    let unique = IndexOptions::builder().unique(true).build();
    let vote_index = IndexModel::builder()
        .keys(doc! {"nullifier": 1, "election_id": 1})
        .options(unique)
        .build();
    votes.create_index(vote_index, None).await?;

    // Tallies and audits.
    let election_index = IndexModel::builder()
        .keys(doc! {"election_id": 1})
        .build();
    votes.create_index(election_index, None).await?;

    Ok(())
}

/// Return true if the given error is a duplicate key write error.
fn is_duplicate_key_error(err: &DbError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY
    )
}

fn unavailable(err: DbError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Vote store backed by MongoDB. Uniqueness is enforced by the unique index
/// on `(nullifier, election_id)`, so concurrent inserts need no locking here.
#[derive(Clone)]
pub struct MongoStore {
    votes: Coll<VoteRecord>,
}

impl MongoStore {
    /// Use the `votes` collection of `db`. Call [`ensure_indexes_exist`] first.
    pub fn new(db: &Database) -> Self {
        Self {
            votes: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl VoteStore for MongoStore {
    async fn insert_unique(&self, record: VoteRecord) -> Result<(), StoreError> {
        match self.votes.insert_one(record, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key_error(&err) => Err(StoreError::Duplicate),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn find(
        &self,
        nullifier: &Nullifier,
        election_id: &str,
    ) -> Result<Option<VoteRecord>, StoreError> {
        let filter = doc! {
            "nullifier": nullifier.to_string(),
            "election_id": election_id,
        };
        self.votes.find_one(filter, None).await.map_err(unavailable)
    }

    async fn find_by_nullifier(
        &self,
        nullifier: &Nullifier,
    ) -> Result<Option<VoteRecord>, StoreError> {
        let filter = doc! { "nullifier": nullifier.to_string() };
        self.votes.find_one(filter, None).await.map_err(unavailable)
    }

    async fn records_for(&self, election_id: &str) -> Result<Vec<VoteRecord>, StoreError> {
        let filter = doc! { "election_id": election_id };
        self.votes
            .find(filter, None)
            .await
            .map_err(unavailable)?
            .try_collect()
            .await
            .map_err(unavailable)
    }
}
