pub mod adjudication;
pub mod advisor;
pub mod offer;
pub mod solicitud;
