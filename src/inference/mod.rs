pub mod artifact;
pub mod hybrid;
pub mod naive_bayes;
