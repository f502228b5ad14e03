use neurograph_core::{Dim, LookupParameterHandle, Model, ParameterHandle};

// Shared by several test crates; not every helper is used by each of them.
#[allow(dead_code)]
pub fn init_logger() {
    // Only the first call has an effect.
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Handles of the model built by [`small_model`].
#[allow(dead_code)]
pub struct SmallModel {
    pub model: Model,
    pub w: ParameterHandle,
    pub b: ParameterHandle,
    pub embeddings: LookupParameterHandle,
}

/// A dense layer plus an embedding table, seeded for reproducibility.
#[allow(dead_code)]
pub fn small_model(seed: u64) -> SmallModel {
    let mut model = Model::with_seed(seed);
    let w = model.add_parameters(&Dim::new(&[3, 4]), 0.0, "w");
    let b = model.add_parameters(&Dim::new(&[3]), 0.1, "b");
    let embeddings = model.add_lookup_parameters(20, &Dim::new(&[4]), 0.5, "embeddings");
    SmallModel {
        model,
        w,
        b,
        embeddings,
    }
}
