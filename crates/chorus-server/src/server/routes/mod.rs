// Route modules for Chorus Server
pub mod broker; // Topic broker socket (broker mode only)
pub mod text; // Envelope relay socket
pub mod users; // Connected-user directory

mod session; // Socket session driver shared by both socket endpoints
