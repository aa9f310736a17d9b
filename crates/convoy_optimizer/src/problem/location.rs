use crate::define_index_newtype;

// Dense index into the per-profile travel matrices. Jobs and vehicle
// endpoints reference locations through this index only; coordinates live in
// the outer layers.
define_index_newtype!(LocationIdx);
