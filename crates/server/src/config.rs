#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub refresh_hz: f32,
    pub max_connections: usize,
    pub ships: usize,
    pub asteroids: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            refresh_hz: 10.0,
            max_connections: 8,
            ships: 2,
            asteroids: 6,
        }
    }
}
