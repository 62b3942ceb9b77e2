use rand::{distributions::Alphanumeric, Rng};

pub fn random_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length).map(|_| rng.sample(Alphanumeric) as char).collect()
}
