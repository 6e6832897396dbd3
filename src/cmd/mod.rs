pub mod xof;
