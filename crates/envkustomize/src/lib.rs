//! # envkustomize - kustomize with environment support
//!
//! For a user guide and material related to CLI usage see <https://github.com/felixgborrego/kubectl-envkustomize>
//!
//! ## Introduction for developers
//!
//! Read this to understand how `envkustomize` works internally.
//!
//! ### Variables
//!
//! All values come from a [store::VariableStore]. It starts out as a copy of the process environment and is then
//! filled from a definition file (`.env` by default), see [definitions::DefinitionLoader]:
//!
//! ```text
//! source ../shared.env
//! export SHOP_HOST=shop.example.org
//! SHOP_URL="https://${SHOP_HOST}"
//! SHOP_DB_PASS=gcp-secret://projects/acme/secrets/db-pass
//! ```
//!
//! Values that reference a secret are fetched while loading, see [secrets]. After loading the store is never
//! modified again.
//!
//! ### Placeholders
//!
//! Manifests contain placeholders that are replaced before kustomize ever parses them, see [expand::Expander]:
//!
//! ```yaml
//! apiVersion: apps/v1
//! kind: Deployment
//! spec:
//!   template:
//!     spec:
//!       containers:
//!         - name: shop
//!           image: registry.example.org/shop:${{{ SHOP_VERSION }}}
//!           env:
//!             - name: ${{{env-expand://SHOP_}}}
//!               value: ${{{env-expand://SHOP_}}}
//! ```
//!
//! ### Composition
//!
//! The composer (see [compose::Composer]) reads every file through a [filesys::FileSystem]. Handing it a
//! [filesys::SubstitutingFileSystem] means every read, including the kustomization itself, comes back with its
//! placeholders expanded. The composer does not know that substitution happens at all.
//!
//! ### Output
//!
//! [render::Renderer] finds the composition roots (the work directory, or every directory below it with a
//! `kustomization.yaml`), composes each and writes all of them into one multi document file.
//!
pub mod compose;
pub mod definitions;
pub mod expand;
pub mod filesys;
pub mod render;
pub mod secrets;
pub mod store;
