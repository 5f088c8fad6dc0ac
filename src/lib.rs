//! Track TV shows from the TMDB catalog in a personal watch list stored in Supabase.
//!
//! The services are built explicitly and handed to whatever composes them:
//! [`tmdb::TmdbClient`] and [`tmdb::CatalogBrowser`] for the catalog,
//! [`auth::SessionHolder`] for the signed-in user, and
//! [`library::LibraryStore`] for that user's saved shows.

pub mod auth;
pub mod config;
pub mod error;
pub mod flight;
pub mod http;
pub mod library;
pub mod mirror;
pub mod models;
pub mod supabase;
pub mod tmdb;
